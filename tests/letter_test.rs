//! Letter directory tests: loading, validation, and message building.

use std::fs;
use std::path::Path;

use mailshot::config::Account;
use mailshot::letter::{self, Letter, ATTACHMENTS_DIR, CONFIG_FILE, CONTENT_FILE, RECIPIENTS_FILE};
use mailshot::MailError;
use tempfile::TempDir;

fn account() -> Account {
    Account {
        userid: "wang.wei".into(),
        password: "secret".into(),
        name: "Wang Wei".into(),
        domain: Some("school.edu".into()),
    }
}

fn write_letter(dir: &Path, config: &str, content: &str, recipients: &str) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join(CONFIG_FILE), config).unwrap();
    fs::write(dir.join(CONTENT_FILE), content).unwrap();
    fs::write(dir.join(RECIPIENTS_FILE), recipients).unwrap();
}

fn basic_letter() -> (TempDir, std::path::PathBuf) {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("seminar");
    write_letter(
        &dir,
        "subject = \"Seminar invitation\"\n",
        "<p>Dear $name,</p><p>Room ${room}.</p><p>$sender</p>",
        "name,email,room\nAlice Chen,alice@example.org,B201\nBob Li,bob,C14\n",
    );
    (tmp, dir)
}

// ============================================================================
// Loading
// ============================================================================

#[test]
fn load_builds_one_message_per_recipient() {
    let (_tmp, dir) = basic_letter();

    let letter = Letter::load(&dir, &account()).unwrap();
    let emails = letter.emails().unwrap();

    assert_eq!(letter.len(), 2);
    assert_eq!(letter.addresses(), vec!["alice@example.org", "bob@school.edu"]);
    assert_eq!(emails.len(), 2);

    let first = &emails[0];
    assert_eq!(first.subject, "Seminar invitation");
    assert_eq!(first.to_header(), "alice@example.org");
    let from = first.from.as_ref().unwrap();
    assert_eq!(from.email, "wang.wei@school.edu");
    assert_eq!(from.name.as_deref(), Some("Wang Wei"));
    assert_eq!(
        first.html_body.as_deref(),
        Some("<p>Dear Alice Chen,</p><p>Room B201.</p><p>Wang Wei</p>")
    );
    assert!(first.date.is_some());
}

#[test]
fn recipient_title_is_applied() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("title");
    write_letter(
        &dir,
        "subject = \"Review request\"\nrecipient_title = \"教授\"\nlast_name_only = true\nfrom = \"Seminar Office\"\n",
        "<p>$name 您好</p>",
        "name,email\n王小明,wang@example.org\n",
    );

    let letter = Letter::load(&dir, &account()).unwrap();
    let email = &letter.emails().unwrap()[0];

    assert_eq!(email.html_body.as_deref(), Some("<p>王教授 您好</p>"));
    assert_eq!(email.from.as_ref().unwrap().name.as_deref(), Some("Seminar Office"));
}

#[test]
fn cc_bcc_and_bcc_to_sender() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("copies");
    write_letter(
        &dir,
        "subject = \"Hi\"\ncc = [\"office\"]\nbcc = [\"archive@example.org\"]\nbcc_to_sender = true\n",
        "<p>Hi $name</p>",
        "name,email\nAlice,alice@example.org\n",
    );

    let letter = Letter::load(&dir, &account()).unwrap();
    let email = &letter.emails().unwrap()[0];

    let cc: Vec<&str> = email.cc.iter().map(|a| a.email.as_str()).collect();
    let bcc: Vec<&str> = email.bcc.iter().map(|a| a.email.as_str()).collect();
    assert_eq!(cc, vec!["office@school.edu"]);
    assert_eq!(bcc, vec!["archive@example.org", "wang.wei@school.edu"]);
}

#[test]
fn attachments_are_added_to_every_message() {
    let (_tmp, dir) = basic_letter();
    let attachments = dir.join(ATTACHMENTS_DIR);
    fs::create_dir_all(&attachments).unwrap();
    fs::write(attachments.join("agenda.pdf"), b"%PDF-1.4").unwrap();
    fs::write(attachments.join(".DS_Store"), b"junk").unwrap();

    let letter = Letter::load(&dir, &account()).unwrap();

    assert_eq!(letter.attachments().len(), 1);
    for email in letter.emails().unwrap() {
        assert_eq!(email.attachments.len(), 1);
        assert_eq!(email.attachments[0].filename, "agenda.pdf");
    }
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn check_accepts_a_valid_letter() {
    let (_tmp, dir) = basic_letter();
    assert!(Letter::check(&dir, Some("school.edu")).is_empty());
}

#[test]
fn check_reports_every_issue() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("broken");
    write_letter(
        &dir,
        "subject = \"Hi\"\n",
        "<p>Dear $name, see you in $room</p>",
        "name,email\nAlice,alice@example.org\n,bob@example.org\nCarol,carol@\nDan,dan@example.org,extra\n",
    );

    let issues = Letter::check(&dir, None);

    assert!(issues.iter().any(|i| i.contains("empty name at row 3")), "{:?}", issues);
    assert!(issues.iter().any(|i| i.contains("invalid email carol@ at row 4")), "{:?}", issues);
    assert!(issues.iter().any(|i| i.contains("too many fields at row 5")), "{:?}", issues);
    assert!(issues.iter().any(|i| i.contains("template field 'room'")), "{:?}", issues);
}

#[test]
fn check_reports_missing_files() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("empty");
    fs::create_dir_all(&dir).unwrap();

    let issues = Letter::check(&dir, None);

    assert_eq!(issues.len(), 3, "{:?}", issues);
    assert!(issues.iter().any(|i| i.contains(CONFIG_FILE)));
    assert!(issues.iter().any(|i| i.contains(CONTENT_FILE)));
    assert!(issues.iter().any(|i| i.contains(RECIPIENTS_FILE)));
}

#[test]
fn check_rejects_a_file_path() {
    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("letter.txt");
    fs::write(&file, "not a letter").unwrap();

    let issues = Letter::check(&file, None);
    assert_eq!(issues.len(), 1);
    assert!(issues[0].contains("is not a directory"));
}

#[test]
fn load_fails_with_invalid_letter() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("nocolumn");
    write_letter(&dir, "subject = \"Hi\"\n", "<p>$name</p>", "name,mail\nAlice,alice@example.org\n");

    match Letter::load(&dir, &account()) {
        Err(MailError::InvalidLetter(issues)) => {
            assert!(issues.iter().any(|i| i.contains("missing 'email' column")), "{:?}", issues);
        }
        other => panic!("expected InvalidLetter, got {:?}", other.map(|l| l.len())),
    }
}

// ============================================================================
// Scaffolding
// ============================================================================

#[test]
fn create_scaffolds_a_loadable_letter() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("new-letter");

    letter::create(&dir).unwrap();

    assert!(dir.join(ATTACHMENTS_DIR).is_dir());
    let loaded = Letter::load(&dir, &account()).unwrap();
    assert_eq!(loaded.len(), 1);
    assert!(letter::create(&dir).is_err());
}
