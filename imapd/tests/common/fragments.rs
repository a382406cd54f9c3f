use anyhow::{bail, Result};
use std::io::Write;
use std::net::TcpStream;

use crate::common::constants::*;
use crate::common::*;

/// These fragments are not a generic IMAP client, only specialized helpers
/// for these tests: the commands sent are fixed strings, not built from
/// arbitrary input, so their correctness is easy to eyeball.

pub fn connect(imap: &mut TcpStream) -> Result<()> {
    let mut buffer: [u8; 1500] = [0; 1500];
    let read = read_lines(imap, &mut buffer, None)?;
    assert_eq!(&read[..4], &b"* OK"[..]);
    Ok(())
}

pub enum Extension {
    None,
    Idle,
    Move,
    Unselect,
    CondStore,
    UidPlus,
}

pub fn capability(imap: &mut TcpStream, ext: Extension) -> Result<()> {
    imap.write_all(b"5 capability\r\n")?;

    let maybe_ext = match ext {
        Extension::None => None,
        Extension::Idle => Some("IDLE"),
        Extension::Move => Some("MOVE"),
        Extension::Unselect => Some("UNSELECT"),
        Extension::CondStore => Some("CONDSTORE"),
        Extension::UidPlus => Some("UIDPLUS"),
    };

    let mut buffer: [u8; 1500] = [0; 1500];
    let read = read_lines(imap, &mut buffer, Some(b"5 OK"))?;
    let srv_msg = std::str::from_utf8(read)?;
    assert!(srv_msg.contains("IMAP4rev1") || srv_msg.contains("IMAP4REV1"));
    if let Some(ext) = maybe_ext {
        assert!(srv_msg.contains(ext), "missing {} in {}", ext, srv_msg);
    }
    Ok(())
}

pub fn login(imap: &mut TcpStream) -> Result<()> {
    let mut buffer: [u8; 1500] = [0; 1500];
    imap.write_all(b"10 login alice hunter2\r\n")?;
    let read = read_lines(imap, &mut buffer, None)?;
    assert_eq!(&read[..5], &b"10 OK"[..]);
    Ok(())
}

pub fn create_mailbox(imap: &mut TcpStream, mbx: &str) -> Result<()> {
    let mut buffer: [u8; 1500] = [0; 1500];
    imap.write_all(format!("15 create {}\r\n", mbx).as_bytes())?;
    let read = read_lines(imap, &mut buffer, None)?;
    assert_eq!(&read[..5], &b"15 OK"[..]);
    Ok(())
}

pub fn select(imap: &mut TcpStream, mbx: &str) -> Result<String> {
    let mut buffer: [u8; 6000] = [0; 6000];
    imap.write_all(format!("20 select {}\r\n", mbx).as_bytes())?;
    let read = read_lines(imap, &mut buffer, Some(b"20 OK"))?;
    Ok(std::str::from_utf8(read)?.to_string())
}

pub fn unselect(imap: &mut TcpStream) -> Result<()> {
    imap.write_all(b"70 unselect\r\n")?;
    let mut buffer: [u8; 1500] = [0; 1500];
    let _read = read_lines(imap, &mut buffer, Some(b"70 OK"))?;
    Ok(())
}

pub fn close(imap: &mut TcpStream) -> Result<()> {
    imap.write_all(b"71 close\r\n")?;
    let mut buffer: [u8; 1500] = [0; 1500];
    let _read = read_lines(imap, &mut buffer, Some(b"71 OK"))?;
    Ok(())
}

pub fn noop(imap: &mut TcpStream) -> Result<String> {
    imap.write_all(b"21 noop\r\n")?;
    let mut buffer: [u8; 1500] = [0; 1500];
    let read = read_lines(imap, &mut buffer, Some(b"21 OK"))?;
    Ok(std::str::from_utf8(read)?.to_string())
}

/// Waits (looping on NOOP) until the mailbox reports at least `want` messages.
pub fn noop_until_exists(imap: &mut TcpStream, want: u64) -> Result<()> {
    for _ in 0..20 {
        let resp = noop(imap)?;
        if resp.contains(&format!("* {} EXISTS", want)) {
            return Ok(());
        }
        std::thread::sleep(constants::SMALL_DELAY);
    }
    bail!("mailbox never reached {} EXISTS", want)
}

pub fn append(imap: &mut TcpStream, tag: &str, mbx: &str, body: &[u8]) -> Result<String> {
    let mut buffer: [u8; 1500] = [0; 1500];
    imap.write_all(format!("{} append {} {{{}}}\r\n", tag, mbx, body.len()).as_bytes())?;
    let read = read_lines(imap, &mut buffer, Some(b"+"))?;
    assert_eq!(&read[..1], &b"+"[..]);

    imap.write_all(body)?;
    imap.write_all(b"\r\n")?;
    let read = read_lines(imap, &mut buffer, Some(format!("{} OK", tag).as_bytes()))?;
    Ok(std::str::from_utf8(read)?.to_string())
}

pub fn fetch_rfc822(imap: &mut TcpStream, seq: &str) -> Result<String> {
    let mut buffer: [u8; 6000] = [0; 6000];
    imap.write_all(format!("30 fetch {} (RFC822)\r\n", seq).as_bytes())?;
    let read = read_lines(imap, &mut buffer, Some(b"30 OK"))?;
    Ok(std::str::from_utf8(read)?.to_string())
}

pub enum StoreAction {
    AddFlags,
    RemoveFlags,
}

pub fn store(imap: &mut TcpStream, seq: &str, flag: &str, action: StoreAction) -> Result<String> {
    let mut buffer: [u8; 1500] = [0; 1500];
    let op = match action {
        StoreAction::AddFlags => "+FLAGS",
        StoreAction::RemoveFlags => "-FLAGS",
    };
    imap.write_all(format!("35 store {} {} ({})\r\n", seq, op, flag).as_bytes())?;
    let read = read_lines(imap, &mut buffer, Some(b"35 OK"))?;
    Ok(std::str::from_utf8(read)?.to_string())
}

pub fn search(imap: &mut TcpStream, criteria: &str) -> Result<String> {
    let mut buffer: [u8; 1500] = [0; 1500];
    imap.write_all(format!("40 search {}\r\n", criteria).as_bytes())?;
    let read = read_lines(imap, &mut buffer, Some(b"40 OK"))?;
    Ok(std::str::from_utf8(read)?.to_string())
}

pub fn expunge(imap: &mut TcpStream) -> Result<String> {
    let mut buffer: [u8; 1500] = [0; 1500];
    imap.write_all(b"45 expunge\r\n")?;
    let read = read_lines(imap, &mut buffer, Some(b"45 OK"))?;
    Ok(std::str::from_utf8(read)?.to_string())
}

pub fn copy(imap: &mut TcpStream, seq: &str, to: &str) -> Result<String> {
    let mut buffer: [u8; 1500] = [0; 1500];
    imap.write_all(format!("50 copy {} {}\r\n", seq, to).as_bytes())?;
    let read = read_lines(imap, &mut buffer, Some(b"50 OK"))?;
    Ok(std::str::from_utf8(read)?.to_string())
}

pub fn r#move(imap: &mut TcpStream, seq: &str, to: &str) -> Result<String> {
    let mut buffer: [u8; 1500] = [0; 1500];
    imap.write_all(format!("55 move {} {}\r\n", seq, to).as_bytes())?;
    let read = read_lines(imap, &mut buffer, Some(b"55 OK"))?;
    Ok(std::str::from_utf8(read)?.to_string())
}

pub fn rename_mailbox(imap: &mut TcpStream, from: &str, to: &str) -> Result<()> {
    let mut buffer: [u8; 1500] = [0; 1500];
    imap.write_all(format!("60 rename {} {}\r\n", from, to).as_bytes())?;
    let _read = read_lines(imap, &mut buffer, Some(b"60 OK"))?;
    Ok(())
}

pub fn delete_mailbox(imap: &mut TcpStream, mbx: &str) -> Result<()> {
    let mut buffer: [u8; 1500] = [0; 1500];
    imap.write_all(format!("61 delete {}\r\n", mbx).as_bytes())?;
    let _read = read_lines(imap, &mut buffer, Some(b"61 OK"))?;
    Ok(())
}

pub fn start_idle(imap: &mut TcpStream) -> Result<()> {
    let mut buffer: [u8; 1500] = [0; 1500];
    imap.write_all(b"65 idle\r\n")?;
    let read = read_lines(imap, &mut buffer, Some(b"+"))?;
    assert_eq!(&read[..1], &b"+"[..]);
    Ok(())
}

pub fn stop_idle(imap: &mut TcpStream) -> Result<String> {
    let mut buffer: [u8; 1500] = [0; 1500];
    imap.write_all(b"DONE\r\n")?;
    let read = read_lines(imap, &mut buffer, Some(b"65 OK"))?;
    Ok(std::str::from_utf8(read)?.to_string())
}

pub fn logout(imap: &mut TcpStream) -> Result<()> {
    let mut buffer: [u8; 1500] = [0; 1500];
    imap.write_all(b"90 logout\r\n")?;
    let _read = read_lines(imap, &mut buffer, Some(b"90 OK"))?;
    Ok(())
}
