// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Messages sent by the client.

use crate::{
	PROTOCOL_VERSION, Result, WireError,
	buf::{Reader, begin, begin_untagged, put_cstr, split_tagged},
};

const SSL_REQUEST_CODE: i32 = 80877103;
const CANCEL_REQUEST_CODE: i32 = 80877102;

// Startup packets are tiny; the server rejects anything above this.
const MAX_STARTUP_LEN: usize = 10_000;

/// The untagged first packet of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupMessage {
	Startup {
		params: Vec<(String, String)>,
	},
	SslRequest,
	CancelRequest {
		process_id: i32,
		secret_key: i32,
	},
}

impl StartupMessage {
	pub fn param(&self, name: &str) -> Option<&str> {
		match self {
			StartupMessage::Startup {
				params,
			} => params.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str()),
			_ => None,
		}
	}

	pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
		let frame = begin_untagged(out);
		match self {
			StartupMessage::Startup {
				params,
			} => {
				out.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
				for (name, value) in params {
					put_cstr(out, name)?;
					put_cstr(out, value)?;
				}
				out.push(0);
			}
			StartupMessage::SslRequest => {
				out.extend_from_slice(&SSL_REQUEST_CODE.to_be_bytes());
			}
			StartupMessage::CancelRequest {
				process_id,
				secret_key,
			} => {
				out.extend_from_slice(&CANCEL_REQUEST_CODE.to_be_bytes());
				out.extend_from_slice(&process_id.to_be_bytes());
				out.extend_from_slice(&secret_key.to_be_bytes());
			}
		}
		frame.finish(out)?;
		Ok(())
	}

	pub fn decode(buf: &[u8]) -> Result<Option<(Self, usize)>> {
		if buf.len() < 4 {
			return Ok(None);
		}

		let len = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
		if len < 8 || len as usize > MAX_STARTUP_LEN {
			return Err(WireError::InvalidLength {
				tag: '\0',
				len: len.max(0) as usize,
			});
		}
		let len = len as usize;
		if buf.len() < len {
			return Ok(None);
		}

		let mut reader = Reader::new(0, &buf[4..len]);
		let message = match reader.i32()? {
			SSL_REQUEST_CODE => StartupMessage::SslRequest,
			CANCEL_REQUEST_CODE => StartupMessage::CancelRequest {
				process_id: reader.i32()?,
				secret_key: reader.i32()?,
			},
			PROTOCOL_VERSION => {
				let mut params = Vec::new();
				loop {
					let name = reader.cstr()?;
					if name.is_empty() {
						break;
					}
					params.push((name, reader.cstr()?));
				}
				StartupMessage::Startup {
					params,
				}
			}
			version => return Err(WireError::UnsupportedProtocol(version)),
		};
		reader.finish()?;

		Ok(Some((message, len)))
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontendMessage {
	/// Simple query; may contain several `;` separated statements.
	Query(String),
	Password(String),
	Terminate,
	Unknown {
		tag: u8,
		body: Vec<u8>,
	},
}

impl FrontendMessage {
	pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
		match self {
			FrontendMessage::Query(sql) => {
				let frame = begin(out, b'Q');
				put_cstr(out, sql)?;
				frame.finish(out)?;
			}
			FrontendMessage::Password(password) => {
				let frame = begin(out, b'p');
				put_cstr(out, password)?;
				frame.finish(out)?;
			}
			FrontendMessage::Terminate => {
				let frame = begin(out, b'X');
				frame.finish(out)?;
			}
			FrontendMessage::Unknown {
				tag,
				body,
			} => {
				let frame = begin(out, *tag);
				out.extend_from_slice(body);
				frame.finish(out)?;
			}
		}
		Ok(())
	}

	pub fn decode(buf: &[u8]) -> Result<Option<(Self, usize)>> {
		let Some((tag, body, consumed)) = split_tagged(buf)? else {
			return Ok(None);
		};

		let mut reader = Reader::new(tag, body);
		let message = match tag {
			b'Q' => FrontendMessage::Query(reader.cstr()?),
			b'p' => FrontendMessage::Password(reader.cstr()?),
			b'X' => FrontendMessage::Terminate,
			_ => FrontendMessage::Unknown {
				tag,
				body: reader.rest().to_vec(),
			},
		};
		reader.finish()?;

		Ok(Some((message, consumed)))
	}
}
