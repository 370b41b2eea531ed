// Copyright (C) 2022 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded hex dumps for log and error messages.

use pretty_hex::PrettyHex;

/// Debug-formats at most `max_bytes` of `inner` as a hex dump, noting how
/// much was left out.
pub struct LimitedHex<'a> {
    inner: &'a [u8],
    max_bytes: usize,
}

impl<'a> LimitedHex<'a> {
    pub fn new(inner: &'a [u8], max_bytes: usize) -> Self {
        Self { inner, max_bytes }
    }
}

impl std::fmt::Debug for LimitedHex<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shown = std::cmp::min(self.inner.len(), self.max_bytes);
        writeln!(f, "Length: {0} (0x{0:x}) bytes", self.inner.len())?;
        writeln!(
            f,
            "{:#?}",
            self.inner[..shown].hex_conf(pretty_hex::HexConfig {
                title: false,
                ..Default::default()
            })
        )?;
        let omitted = self.inner.len() - shown;
        if omitted > 0 {
            write!(f, "\n...{0} (0x{0:x}) bytes not shown...", omitted)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::LimitedHex;

    #[test]
    fn truncates() {
        let data = [0xabu8; 100];
        let s = format!("{:?}", LimitedHex::new(&data, 16));
        assert!(s.starts_with("Length: 100 (0x64) bytes"));
        assert!(s.ends_with("...84 (0x54) bytes not shown..."));
        let s = format!("{:?}", LimitedHex::new(&data[..4], 16));
        assert!(!s.contains("not shown"));
    }
}
