//! Splitting, joining, and the REPL-style tokenizer / escaper pair.

use remora_common::{AllocError, ByteAllocator};

use crate::{ByteStr, StrError};

/// The characters `split_args` treats as blanks between tokens.
fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c)
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

impl ByteStr {
    /// Split `data` at every exact occurrence of `sep`, returning the
    /// pieces in order. Empty input yields an empty vector; an empty
    /// separator is refused.
    pub fn split(data: &[u8], sep: &[u8]) -> Result<Vec<ByteStr>, StrError> {
        if sep.is_empty() {
            return Err(StrError::EmptySeparator);
        }
        let mut tokens = Vec::new();
        if data.is_empty() {
            return Ok(tokens);
        }
        let mut start = 0;
        let mut j = 0;
        while j + sep.len() <= data.len() {
            if data[j..j + sep.len()] == *sep {
                tokens.try_reserve(1).map_err(AllocError::from)?;
                tokens.push(ByteStr::from_bytes(&data[start..j])?);
                start = j + sep.len();
                j = start;
            } else {
                j += 1;
            }
        }
        tokens.try_reserve(1).map_err(AllocError::from)?;
        tokens.push(ByteStr::from_bytes(&data[start..])?);
        Ok(tokens)
    }

    /// Concatenate `parts` with `sep` between consecutive elements.
    pub fn join<S: AsRef<[u8]>>(parts: &[S], sep: &[u8]) -> Result<ByteStr, AllocError> {
        let mut joined = ByteStr::empty()?;
        for (i, part) in parts.iter().enumerate() {
            joined.append(part.as_ref())?;
            if i != parts.len() - 1 {
                joined.append(sep)?;
            }
        }
        Ok(joined)
    }

    /// Split a line into arguments the way a REPL would.
    ///
    /// Tokens are separated by blanks. Double-quoted tokens understand the
    /// `\n \r \t \a \b` escapes plus `\xHH` for an arbitrary byte;
    /// single-quoted tokens are literal except for `\'`. A closing quote
    /// must be followed by a blank or the end of the line. Unbalanced
    /// quotes make the whole line invalid.
    ///
    /// [`ByteStr::append_repr`] produces quoting this parser reads back.
    pub fn split_args(line: &[u8]) -> Result<Vec<ByteStr>, StrError> {
        let mut args: Vec<ByteStr> = Vec::new();
        let mut i = 0;
        loop {
            while i < line.len() && is_space(line[i]) {
                i += 1;
            }
            if i >= line.len() {
                return Ok(args);
            }

            let mut current = ByteStr::empty()?;
            let mut in_quotes = false;
            let mut in_single = false;
            let mut done = false;
            while !done {
                let b = line.get(i).copied();
                if in_quotes {
                    match b {
                        None => return Err(StrError::UnbalancedQuotes),
                        Some(b'\\')
                            if i + 3 < line.len()
                                && line[i + 1] == b'x'
                                && hex_val(line[i + 2]).is_some()
                                && hex_val(line[i + 3]).is_some() =>
                        {
                            let byte = hex_val(line[i + 2]).unwrap() * 16 + hex_val(line[i + 3]).unwrap();
                            current.append(&[byte])?;
                            i += 3;
                        }
                        Some(b'\\') if i + 1 < line.len() => {
                            i += 1;
                            let c = match line[i] {
                                b'n' => b'\n',
                                b'r' => b'\r',
                                b't' => b'\t',
                                b'b' => 0x08,
                                b'a' => 0x07,
                                other => other,
                            };
                            current.append(&[c])?;
                        }
                        Some(b'"') => {
                            // The closing quote must end the token.
                            if i + 1 < line.len() && !is_space(line[i + 1]) {
                                return Err(StrError::UnbalancedQuotes);
                            }
                            done = true;
                        }
                        Some(other) => current.append(&[other])?,
                    }
                } else if in_single {
                    match b {
                        None => return Err(StrError::UnbalancedQuotes),
                        Some(b'\\') if line.get(i + 1) == Some(&b'\'') => {
                            i += 1;
                            current.append(b"'")?;
                        }
                        Some(b'\'') => {
                            if i + 1 < line.len() && !is_space(line[i + 1]) {
                                return Err(StrError::UnbalancedQuotes);
                            }
                            done = true;
                        }
                        Some(other) => current.append(&[other])?,
                    }
                } else {
                    match b {
                        None | Some(b' ') | Some(b'\n') | Some(b'\r') | Some(b'\t') => done = true,
                        Some(b'"') => in_quotes = true,
                        Some(b'\'') => in_single = true,
                        Some(other) => current.append(&[other])?,
                    }
                }
                if i < line.len() {
                    i += 1;
                }
            }
            args.try_reserve(1).map_err(AllocError::from)?;
            args.push(current);
        }
    }
}

impl<A: ByteAllocator> ByteStr<A> {
    /// Append a double-quoted, escaped rendering of `data` that
    /// [`ByteStr::split_args`] parses back to the original bytes.
    pub fn append_repr(&mut self, data: &[u8]) -> Result<(), AllocError> {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        self.append(b"\"")?;
        for &b in data {
            match b {
                b'\\' | b'"' => self.append(&[b'\\', b])?,
                b'\n' => self.append(b"\\n")?,
                b'\r' => self.append(b"\\r")?,
                b'\t' => self.append(b"\\t")?,
                0x07 => self.append(b"\\a")?,
                0x08 => self.append(b"\\b")?,
                _ if b.is_ascii_graphic() || b == b' ' => self.append(&[b])?,
                _ => self.append(&[b'\\', b'x', HEX[(b >> 4) as usize], HEX[(b & 0x0f) as usize]])?,
            }
        }
        self.append(b"\"")
    }
}
