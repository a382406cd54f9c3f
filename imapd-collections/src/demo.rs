//! Seed data loader for manual probing and integration tests: walks a
//! `demo/<mailbox>/` directory tree and populates a [`User`]'s mailboxes
//! before the first LOGIN can observe them.
//!
//! Each file under a mailbox directory is one message: the first line is a
//! space-separated flag list, the second line is a Unix epoch timestamp, and
//! the remaining bytes are the raw RFC 5322 message. A file named
//! `.readonly` marks the mailbox read-only; any other dotfile is ignored.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::user::User;

/// Loads every mailbox under `root` into `user`, creating mailboxes as
/// needed. `root`'s immediate subdirectories are mailbox names; nested
/// hierarchy in a mailbox's name uses the usual `.` delimiter, so a
/// directory named `Work.Projects` creates (or reuses) a mailbox with that
/// exact name, not a `Work` mailbox containing a `Projects` child directory.
pub async fn load_demo_data(user: &User, root: &Path) -> Result<()> {
    let mut entries: Vec<_> = fs::read_dir(root)
        .with_context(|| format!("reading demo directory {}", root.display()))?
        .collect::<std::io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let mailbox_name = entry.file_name().to_string_lossy().into_owned();
        load_mailbox(user, &mailbox_name, &path).await?;
    }
    Ok(())
}

async fn load_mailbox(user: &User, mailbox_name: &str, dir: &Path) -> Result<()> {
    if !user.has_mailbox(mailbox_name) {
        user.create_mailbox(mailbox_name)?;
    }
    let mailbox = user
        .open_mailbox(mailbox_name)
        .await?
        .context("just-created mailbox vanished")?;

    let mut entries: Vec<_> = fs::read_dir(dir)
        .with_context(|| format!("reading demo mailbox directory {}", dir.display()))?
        .collect::<std::io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();

        if file_name == ".readonly" {
            user.mark_mailbox_read_only(mailbox_name);
            continue;
        }
        if file_name.starts_with('.') {
            continue;
        }

        let raw = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        let (flags, internaldate, body) = parse_demo_message(&raw)
            .with_context(|| format!("parsing demo message {}", path.display()))?;
        mailbox.append(body.to_vec(), None, &flags, internaldate).await?;
    }
    Ok(())
}

/// Splits a demo message file into its flag list, internal date, and raw
/// RFC 5322 bytes. Returns the body as a slice borrowed from `raw`.
fn parse_demo_message(raw: &[u8]) -> Result<(Vec<String>, u64, &[u8])> {
    let (flag_line, rest) = split_line(raw).context("missing flag line")?;
    let (date_line, body) = split_line(rest).context("missing date line")?;

    let flags = std::str::from_utf8(flag_line)
        .context("flag line is not valid UTF-8")?
        .split_whitespace()
        .map(String::from)
        .collect();

    let internaldate = std::str::from_utf8(date_line)
        .context("date line is not valid UTF-8")?
        .trim()
        .parse::<u64>()
        .context("date line is not a Unix epoch integer")?;

    Ok((flags, internaldate, body))
}

fn split_line(buf: &[u8]) -> Option<(&[u8], &[u8])> {
    let pos = buf.iter().position(|&b| b == b'\n')?;
    let line = &buf[..pos];
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    Some((line, &buf[pos + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags_date_and_body() {
        let raw = b"\\Seen \\Answered\n1700000000\nSubject: hi\r\n\r\nbody\r\n";
        let (flags, date, body) = parse_demo_message(raw).unwrap();
        assert_eq!(flags, vec!["\\Seen".to_string(), "\\Answered".to_string()]);
        assert_eq!(date, 1700000000);
        assert_eq!(body, b"Subject: hi\r\n\r\nbody\r\n");
    }

    #[test]
    fn empty_flag_line_yields_no_flags() {
        let raw = b"\n0\r\n\r\n";
        let (flags, date, _) = parse_demo_message(raw).unwrap();
        assert!(flags.is_empty());
        assert_eq!(date, 0);
    }

    #[tokio::test]
    async fn loads_mailbox_tree_from_disk() {
        let tmp = std::env::temp_dir().join(format!(
            "imapd-demo-test-{}",
            crate::unique_ident::gen_ident()
        ));
        let inbox_dir = tmp.join("INBOX");
        fs::create_dir_all(&inbox_dir).unwrap();
        fs::write(
            inbox_dir.join("1"),
            b"\\Seen\n1700000000\nSubject: one\r\n\r\nbody\r\n".to_vec(),
        )
        .unwrap();
        fs::write(inbox_dir.join(".readonly"), b"").unwrap();

        let user = User::open("demo-test-user".to_string());
        load_demo_data(&user, &tmp).await.unwrap();

        let mbox = user.open_mailbox("INBOX").await.unwrap().unwrap();
        let index = mbox.current_uid_index().await;
        assert_eq!(index.table.len(), 1);
        assert!(user.is_mailbox_read_only("INBOX"));

        fs::remove_dir_all(&tmp).ok();
    }
}
