//! Formatted appends: the general `format_args!` path and the fast
//! template path that renders the handful of directives it knows by hand.

use std::fmt::{self, Write as _};

use remora_common::{AllocError, ByteAllocator};

use crate::{ByteStr, StrError};

/// Longest decimal rendering of a 64-bit integer, sign included.
const INT_BUF: usize = 21;

/// Digits of `value`, written into the front of `buf`. Returns the length.
fn format_i64(buf: &mut [u8; INT_BUF], value: i64) -> usize {
    let mut v = value.unsigned_abs();
    let mut p = 0;
    loop {
        buf[p] = b'0' + (v % 10) as u8;
        p += 1;
        v /= 10;
        if v == 0 {
            break;
        }
    }
    if value < 0 {
        buf[p] = b'-';
        p += 1;
    }
    buf[..p].reverse();
    p
}

fn format_u64(buf: &mut [u8; INT_BUF], mut v: u64) -> usize {
    let mut p = 0;
    loop {
        buf[p] = b'0' + (v % 10) as u8;
        p += 1;
        v /= 10;
        if v == 0 {
            break;
        }
    }
    buf[..p].reverse();
    p
}

/// An argument for [`ByteStr::append_template`].
///
/// `%s` consumes a [`Arg::Str`], `%S` a binary-safe [`Arg::Bytes`],
/// `%i`/`%I` an [`Arg::Int`] and `%u`/`%U` an [`Arg::Uint`].
#[derive(Debug, Clone, Copy)]
pub enum Arg<'a> {
    Str(&'a str),
    Bytes(&'a [u8]),
    Int(i64),
    Uint(u64),
}

impl<A: ByteAllocator> ByteStr<A> {
    /// Append `format_args!` output, e.g.
    /// `s.append_fmt(format_args!("{}:{}", host, port))`. The general
    /// formatting machinery runs here; the string is untouched on failure.
    pub fn append_fmt(&mut self, args: fmt::Arguments<'_>) -> Result<(), StrError> {
        if let Some(lit) = args.as_str() {
            return self.append(lit.as_bytes()).map_err(StrError::from);
        }
        // Render to scratch first so a failure leaves self unchanged.
        let mut scratch = String::new();
        if scratch.write_fmt(args).is_err() {
            return Err(StrError::Fmt);
        }
        self.append(scratch.as_bytes()).map_err(StrError::from)
    }

    /// Append `template` with `%`-directives substituted from `args`.
    ///
    /// Supported directives: `%s` (text), `%S` (byte string), `%i`/`%I`
    /// (signed), `%u`/`%U` (unsigned), `%%` (literal percent). Integers
    /// are rendered by a local digit writer; nothing here touches the
    /// general formatting machinery, which makes this the cheap path for
    /// hot logging/protocol lines.
    ///
    /// Supplying too few arguments, or an argument of the wrong shape for
    /// its directive, is a programming error and panics.
    pub fn append_template(&mut self, template: &str, args: &[Arg<'_>]) -> Result<(), AllocError> {
        let mut args = args.iter();
        let mut next_arg = || args.next().expect("append_template: too few arguments");
        let bytes = template.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'%' if i + 1 < bytes.len() => {
                    i += 1;
                    match bytes[i] {
                        b's' => match next_arg() {
                            Arg::Str(v) => self.append(v.as_bytes())?,
                            other => panic!("append_template: %s got {other:?}"),
                        },
                        b'S' => match next_arg() {
                            Arg::Bytes(v) => self.append(v)?,
                            other => panic!("append_template: %S got {other:?}"),
                        },
                        b'i' | b'I' => match next_arg() {
                            Arg::Int(v) => {
                                let mut buf = [0u8; INT_BUF];
                                let n = format_i64(&mut buf, *v);
                                self.append(&buf[..n])?;
                            }
                            other => panic!("append_template: %i got {other:?}"),
                        },
                        b'u' | b'U' => match next_arg() {
                            Arg::Uint(v) => {
                                let mut buf = [0u8; INT_BUF];
                                let n = format_u64(&mut buf, *v);
                                self.append(&buf[..n])?;
                            }
                            other => panic!("append_template: %u got {other:?}"),
                        },
                        // Covers %% and any unknown directive byte.
                        other => self.append(&[other])?,
                    }
                }
                other => self.append(&[other])?,
            }
            i += 1;
        }
        Ok(())
    }
}

impl ByteStr {
    /// The decimal rendering of `value` as a fresh string.
    pub fn from_i64(value: i64) -> Result<Self, AllocError> {
        let mut buf = [0u8; INT_BUF];
        let n = format_i64(&mut buf, value);
        Self::from_bytes(&buf[..n])
    }
}
