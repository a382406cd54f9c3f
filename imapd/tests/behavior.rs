use anyhow::Context;

mod common;
use crate::common::constants::*;
use crate::common::fragments::*;

fn main() {
    rfc3501_imap4rev1_base();
    rfc3691_imapext_unselect();
    rfc6851_imapext_move();
    rfc2177_imapext_idle();
    rfc4315_imapext_uidplus();
    println!("all behavior tests passed");
}

fn rfc3501_imap4rev1_base() {
    println!("rfc3501_imap4rev1_base");
    common::imapd_dev_daemon(|imap| {
        connect(imap).context("server says hello")?;
        capability(imap, Extension::None).context("check server capabilities")?;
        login(imap).context("login test")?;
        create_mailbox(imap, "Archive").context("created mailbox archive")?;
        let select_res = select(imap, "INBOX").context("select inbox")?;
        assert!(select_res.contains("* 0 EXISTS"));

        let res = append(imap, "25", "INBOX", EMAIL_BASIC).context("insert email in INBOX")?;
        assert!(res.contains("25 OK"));
        noop_until_exists(imap, 1).context("noop loop must detect the new email")?;

        let srv_msg = fetch_rfc822(imap, "1").context("fetch rfc822 message")?;
        let orig_email = std::str::from_utf8(EMAIL_BASIC)?;
        assert!(srv_msg.contains(orig_email));

        copy(imap, "1", "Archive").context("copy message to the archive mailbox")?;
        append(imap, "26", "INBOX", EMAIL_MULTIPART).context("insert second email")?;
        noop_until_exists(imap, 2).context("noop loop must detect the second email")?;

        let search_res = search(imap, "TEXT \"OoOoO\"")?;
        assert!(search_res.contains("* SEARCH"));

        store(imap, "1", "\\Deleted", StoreAction::AddFlags)
            .context("add delete flag to the first email")?;
        expunge(imap).context("expunge emails")?;

        rename_mailbox(imap, "Archive", "Drafts").context("Archive renamed to Drafts")?;
        delete_mailbox(imap, "Drafts").context("Drafts deleted")?;

        logout(imap).context("logout")?;
        Ok(())
    })
    .expect("test fully run");
}

fn rfc3691_imapext_unselect() {
    println!("rfc3691_imapext_unselect");
    common::imapd_dev_daemon(|imap| {
        connect(imap).context("server says hello")?;
        capability(imap, Extension::Unselect).context("check server capabilities")?;
        login(imap).context("login test")?;

        let select_res = select(imap, "INBOX").context("select inbox")?;
        assert!(select_res.contains("* 0 EXISTS"));

        append(imap, "25", "INBOX", EMAIL_BASIC).context("insert email")?;
        noop_until_exists(imap, 1).context("noop loop must detect the new email")?;

        store(imap, "1", "\\Deleted", StoreAction::AddFlags)
            .context("add delete flags to the email")?;
        unselect(imap).context("unselect inbox while preserving the flagged email")?;

        let select_res = select(imap, "INBOX").context("select inbox again")?;
        assert!(select_res.contains("* 1 EXISTS"));

        let srv_msg = fetch_rfc822(imap, "1").context("message is still present")?;
        let orig_email = std::str::from_utf8(EMAIL_BASIC)?;
        assert!(srv_msg.contains(orig_email));

        close(imap).context("close inbox and expunge message")?;
        let select_res = select(imap, "INBOX").context("select inbox again, should be empty")?;
        assert!(select_res.contains("* 0 EXISTS"));

        logout(imap)?;
        Ok(())
    })
    .expect("test fully run");
}

fn rfc6851_imapext_move() {
    println!("rfc6851_imapext_move");
    common::imapd_dev_daemon(|imap| {
        connect(imap).context("server says hello")?;
        capability(imap, Extension::Move).context("check server capabilities")?;
        login(imap).context("login test")?;
        create_mailbox(imap, "Archive").context("created mailbox archive")?;

        let select_res = select(imap, "INBOX").context("select inbox")?;
        assert!(select_res.contains("* 0 EXISTS"));

        append(imap, "25", "INBOX", EMAIL_BASIC).context("insert email")?;
        noop_until_exists(imap, 1).context("noop loop must detect the new email")?;

        r#move(imap, "1", "Archive").context("message moved from inbox to archive")?;

        unselect(imap).context("unselect inbox")?;
        let select_res = select(imap, "Archive").context("select archive")?;
        assert!(select_res.contains("* 1 EXISTS"));

        let srv_msg = fetch_rfc822(imap, "1").context("check mail exists in archive")?;
        let orig_email = std::str::from_utf8(EMAIL_BASIC)?;
        assert!(srv_msg.contains(orig_email));

        logout(imap).context("must quit")?;
        Ok(())
    })
    .expect("test fully run");
}

fn rfc2177_imapext_idle() {
    println!("rfc2177_imapext_idle");
    common::imapd_dev_daemon(|imap| {
        connect(imap).context("server says hello")?;
        capability(imap, Extension::Idle).context("check server capabilities")?;
        login(imap).context("login test")?;
        select(imap, "INBOX").context("select inbox")?;

        start_idle(imap).context("can't start idling")?;
        append(imap, "26", "INBOX", EMAIL_BASIC).context("insert email while idling")?;
        let srv_msg = stop_idle(imap).context("stop idling")?;
        assert!(srv_msg.contains("* 1 EXISTS"));

        logout(imap)?;
        Ok(())
    })
    .expect("test fully run");
}

fn rfc4315_imapext_uidplus() {
    println!("rfc4315_imapext_uidplus");
    common::imapd_dev_daemon(|imap| {
        connect(imap).context("server says hello")?;
        capability(imap, Extension::UidPlus).context("check server capabilities")?;
        login(imap).context("login test")?;
        select(imap, "INBOX").context("select inbox")?;

        let res = append(imap, "25", "INBOX", EMAIL_BASIC).context("first append")?;
        assert!(res.contains("APPENDUID"));

        create_mailbox(imap, "Archive").context("created mailbox archive")?;
        noop_until_exists(imap, 1)?;
        let res = copy(imap, "1", "Archive").context("copy should report COPYUID")?;
        assert!(res.contains("COPYUID"));

        logout(imap)?;
        Ok(())
    })
    .expect("test fully run");
}
