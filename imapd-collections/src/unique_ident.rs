use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use lazy_static::lazy_static;
use rand::prelude::*;

/// An internal mail identifier is composed of two components:
/// - a process identifier, 128 bits, itself composed of:
///   - the timestamp of when the process started, 64 bits
///   - a 64-bit random number
/// - a sequence number, 64 bits
///
/// Not part of the wire protocol; just an internal handle that's unique
/// without requiring synchronization between processes.
#[derive(Clone, Copy, PartialOrd, Ord, PartialEq, Eq, Hash, Debug)]
pub struct UniqueIdent(pub [u8; 24]);

struct IdentGenerator {
    pid: u128,
    sn: AtomicU64,
}

impl IdentGenerator {
    fn new() -> Self {
        let time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_millis();
        let rand = thread_rng().gen::<u64>() as u128;
        Self {
            pid: (time << 64) | rand,
            sn: AtomicU64::new(0),
        }
    }

    fn gen(&self) -> UniqueIdent {
        let sn = self.sn.fetch_add(1, Ordering::Relaxed);
        let mut res = [0u8; 24];
        res[0..16].copy_from_slice(&u128::to_be_bytes(self.pid));
        res[16..24].copy_from_slice(&u64::to_be_bytes(sn));
        UniqueIdent(res)
    }
}

lazy_static! {
    static ref GENERATOR: IdentGenerator = IdentGenerator::new();
}

pub fn gen_ident() -> UniqueIdent {
    GENERATOR.gen()
}

impl std::fmt::Display for UniqueIdent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in self.0.iter() {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl FromStr for UniqueIdent {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<UniqueIdent, &'static str> {
        if s.len() != 48 {
            return Err("bad length");
        }
        let mut tmp = [0u8; 24];
        for (i, chunk) in tmp.iter_mut().enumerate() {
            let byte = &s[i * 2..i * 2 + 2];
            *chunk = u8::from_str_radix(byte, 16).map_err(|_| "invalid hex")?;
        }
        Ok(UniqueIdent(tmp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_idents_are_distinct_and_increasing() {
        let a = gen_ident();
        let b = gen_ident();
        assert_ne!(a, b);
    }

    #[test]
    fn round_trips_through_display_and_from_str() {
        let id = gen_ident();
        let s = id.to_string();
        let parsed: UniqueIdent = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn rejects_bad_length() {
        assert!("abcd".parse::<UniqueIdent>().is_err());
    }
}
