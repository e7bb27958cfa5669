// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use crate::{MAX_MESSAGE_LEN, Result, WireError};

/// Split one tagged message off the front of `buf`.
///
/// Returns the tag, the message body (without tag and length prefix) and the
/// total number of bytes the message occupies.
pub(crate) fn split_tagged(buf: &[u8]) -> Result<Option<(u8, &[u8], usize)>> {
	if buf.len() < 5 {
		return Ok(None);
	}

	let tag = buf[0];
	let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
	if len < 4 || len as usize > MAX_MESSAGE_LEN {
		return Err(WireError::InvalidLength {
			tag: tag as char,
			len: len.max(0) as usize,
		});
	}

	let total = 1 + len as usize;
	if buf.len() < total {
		return Ok(None);
	}

	Ok(Some((tag, &buf[5..total], total)))
}

/// A message being written, see [`begin`] and [`begin_untagged`].
pub(crate) struct Frame {
	tag: char,
	start: usize,
	at: usize,
}

/// Start a tagged message.
pub(crate) fn begin(out: &mut Vec<u8>, tag: u8) -> Frame {
	let start = out.len();
	out.push(tag);
	let at = out.len();
	out.extend_from_slice(&[0; 4]);
	Frame {
		tag: tag as char,
		start,
		at,
	}
}

/// Start an untagged (startup style) message.
pub(crate) fn begin_untagged(out: &mut Vec<u8>) -> Frame {
	let at = out.len();
	out.extend_from_slice(&[0; 4]);
	Frame {
		tag: '\0',
		start: at,
		at,
	}
}

impl Frame {
	/// Back-fill the length field. A message over [`MAX_MESSAGE_LEN`] is
	/// removed from `out` again and rejected.
	pub(crate) fn finish(self, out: &mut Vec<u8>) -> Result<()> {
		self.finish_within(out, MAX_MESSAGE_LEN)
	}

	fn finish_within(self, out: &mut Vec<u8>, limit: usize) -> Result<()> {
		let len = out.len() - self.at;
		if len > limit {
			out.truncate(self.start);
			return Err(WireError::InvalidLength {
				tag: self.tag,
				len,
			});
		}
		out[self.at..self.at + 4].copy_from_slice(&(len as i32).to_be_bytes());
		Ok(())
	}
}

pub(crate) fn put_cstr(out: &mut Vec<u8>, value: &str) -> Result<()> {
	if value.as_bytes().contains(&0) {
		return Err(WireError::EmbeddedNul);
	}
	out.extend_from_slice(value.as_bytes());
	out.push(0);
	Ok(())
}

/// Cursor over a message body.
pub(crate) struct Reader<'a> {
	tag: char,
	data: &'a [u8],
}

impl<'a> Reader<'a> {
	pub(crate) fn new(tag: u8, data: &'a [u8]) -> Self {
		Self {
			tag: tag as char,
			data,
		}
	}

	pub(crate) fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
		if self.data.len() < n {
			return Err(WireError::Truncated {
				tag: self.tag,
			});
		}
		let (head, tail) = self.data.split_at(n);
		self.data = tail;
		Ok(head)
	}

	pub(crate) fn u8(&mut self) -> Result<u8> {
		Ok(self.bytes(1)?[0])
	}

	pub(crate) fn i16(&mut self) -> Result<i16> {
		let b = self.bytes(2)?;
		Ok(i16::from_be_bytes([b[0], b[1]]))
	}

	pub(crate) fn i32(&mut self) -> Result<i32> {
		let b = self.bytes(4)?;
		Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
	}

	pub(crate) fn cstr(&mut self) -> Result<String> {
		let end = self.data.iter().position(|b| *b == 0).ok_or(WireError::MissingNul {
			tag: self.tag,
		})?;
		let value = std::str::from_utf8(&self.data[..end])
			.map_err(|_| WireError::InvalidUtf8 {
				tag: self.tag,
			})?
			.to_string();
		self.data = &self.data[end + 1..];
		Ok(value)
	}

	pub(crate) fn rest(&mut self) -> &'a [u8] {
		std::mem::take(&mut self.data)
	}

	pub(crate) fn finish(self) -> Result<()> {
		if self.data.is_empty() {
			Ok(())
		} else {
			Err(WireError::TrailingBytes {
				tag: self.tag,
				remaining: self.data.len(),
			})
		}
	}
}
