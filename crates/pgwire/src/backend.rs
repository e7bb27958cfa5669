// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Messages sent by the server.

use crate::{
	Result, WireError,
	buf::{Reader, begin, put_cstr, split_tagged},
};

const TEXT_OID: i32 = 25;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authentication {
	Ok,
	CleartextPassword,
	Md5Password {
		salt: [u8; 4],
	},
	/// Any other request (Kerberos, SCRAM, ...), identified by its code.
	Other(i32),
}

impl Authentication {
	fn code(&self) -> i32 {
		match self {
			Authentication::Ok => 0,
			Authentication::CleartextPassword => 3,
			Authentication::Md5Password {
				..
			} => 5,
			Authentication::Other(code) => *code,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
	Idle,
	InTransaction,
	Failed,
}

impl TransactionStatus {
	fn from_byte(byte: u8) -> Option<Self> {
		match byte {
			b'I' => Some(TransactionStatus::Idle),
			b'T' => Some(TransactionStatus::InTransaction),
			b'E' => Some(TransactionStatus::Failed),
			_ => None,
		}
	}

	fn as_byte(self) -> u8 {
		match self {
			TransactionStatus::Idle => b'I',
			TransactionStatus::InTransaction => b'T',
			TransactionStatus::Failed => b'E',
		}
	}
}

/// Field list of an `ErrorResponse` or `NoticeResponse`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorFields {
	pub fields: Vec<(u8, String)>,
}

impl ErrorFields {
	pub fn new(severity: &str, code: &str, message: impl Into<String>) -> Self {
		Self {
			fields: vec![
				(b'S', severity.to_string()),
				(b'V', severity.to_string()),
				(b'C', code.to_string()),
				(b'M', message.into()),
			],
		}
	}

	pub fn with(mut self, field: u8, value: impl Into<String>) -> Self {
		self.fields.push((field, value.into()));
		self
	}

	pub fn get(&self, field: u8) -> Option<&str> {
		self.fields.iter().find(|(f, _)| *f == field).map(|(_, v)| v.as_str())
	}

	/// Non-localized severity when the server sends it, localized otherwise.
	pub fn severity(&self) -> &str {
		self.get(b'V').or_else(|| self.get(b'S')).unwrap_or("ERROR")
	}

	/// SQLSTATE code.
	pub fn code(&self) -> &str {
		self.get(b'C').unwrap_or("XX000")
	}

	pub fn message(&self) -> &str {
		self.get(b'M').unwrap_or("")
	}

	pub fn detail(&self) -> Option<&str> {
		self.get(b'D')
	}

	pub fn hint(&self) -> Option<&str> {
		self.get(b'H')
	}

	fn decode(reader: &mut Reader<'_>) -> Result<Self> {
		let mut fields = Vec::new();
		loop {
			let field = reader.u8()?;
			if field == 0 {
				break;
			}
			fields.push((field, reader.cstr()?));
		}
		Ok(Self {
			fields,
		})
	}

	fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
		for (field, value) in &self.fields {
			out.push(*field);
			put_cstr(out, value)?;
		}
		out.push(0);
		Ok(())
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendMessage {
	Authentication(Authentication),
	ParameterStatus {
		name: String,
		value: String,
	},
	BackendKeyData {
		process_id: i32,
		secret_key: i32,
	},
	ReadyForQuery(TransactionStatus),
	CommandComplete(String),
	/// Column names of the rows that follow.
	RowDescription(Vec<String>),
	DataRow(Vec<Option<Vec<u8>>>),
	EmptyQueryResponse,
	ErrorResponse(ErrorFields),
	NoticeResponse(ErrorFields),
	/// Asynchronous `NOTIFY` delivered to a listening session.
	NotificationResponse {
		process_id: i32,
		channel: String,
		payload: String,
	},
	Unknown {
		tag: u8,
		body: Vec<u8>,
	},
}

impl BackendMessage {
	/// Decode the first message in `buf`.
	///
	/// Returns `Ok(None)` when `buf` does not yet hold a complete message.
	pub fn decode(buf: &[u8]) -> Result<Option<(Self, usize)>> {
		let Some((tag, body, consumed)) = split_tagged(buf)? else {
			return Ok(None);
		};

		let mut reader = Reader::new(tag, body);
		let message = match tag {
			b'R' => {
				let auth = match reader.i32()? {
					0 => Authentication::Ok,
					3 => Authentication::CleartextPassword,
					5 => {
						let salt = reader.bytes(4)?;
						Authentication::Md5Password {
							salt: [salt[0], salt[1], salt[2], salt[3]],
						}
					}
					code => {
						reader.rest();
						Authentication::Other(code)
					}
				};
				BackendMessage::Authentication(auth)
			}
			b'S' => BackendMessage::ParameterStatus {
				name: reader.cstr()?,
				value: reader.cstr()?,
			},
			b'K' => BackendMessage::BackendKeyData {
				process_id: reader.i32()?,
				secret_key: reader.i32()?,
			},
			b'Z' => {
				let byte = reader.u8()?;
				let status =
					TransactionStatus::from_byte(byte).ok_or(WireError::UnknownTransactionStatus(byte))?;
				BackendMessage::ReadyForQuery(status)
			}
			b'C' => BackendMessage::CommandComplete(reader.cstr()?),
			b'T' => {
				let count = reader.i16()?.max(0) as usize;
				let mut names = Vec::with_capacity(count);
				for _ in 0..count {
					names.push(reader.cstr()?);
					// table oid, attribute number, type oid, type size, type modifier, format
					reader.bytes(18)?;
				}
				BackendMessage::RowDescription(names)
			}
			b'D' => {
				let count = reader.i16()?.max(0) as usize;
				let mut values = Vec::with_capacity(count);
				for _ in 0..count {
					let len = reader.i32()?;
					if len < 0 {
						values.push(None);
					} else {
						values.push(Some(reader.bytes(len as usize)?.to_vec()));
					}
				}
				BackendMessage::DataRow(values)
			}
			b'I' => BackendMessage::EmptyQueryResponse,
			b'E' => BackendMessage::ErrorResponse(ErrorFields::decode(&mut reader)?),
			b'N' => BackendMessage::NoticeResponse(ErrorFields::decode(&mut reader)?),
			b'A' => BackendMessage::NotificationResponse {
				process_id: reader.i32()?,
				channel: reader.cstr()?,
				payload: reader.cstr()?,
			},
			_ => BackendMessage::Unknown {
				tag,
				body: reader.rest().to_vec(),
			},
		};
		reader.finish()?;

		Ok(Some((message, consumed)))
	}

	/// Append the encoded message to `out`.
	pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
		match self {
			BackendMessage::Authentication(auth) => {
				let frame = begin(out, b'R');
				out.extend_from_slice(&auth.code().to_be_bytes());
				if let Authentication::Md5Password {
					salt,
				} = auth
				{
					out.extend_from_slice(salt);
				}
				frame.finish(out)?;
			}
			BackendMessage::ParameterStatus {
				name,
				value,
			} => {
				let frame = begin(out, b'S');
				put_cstr(out, name)?;
				put_cstr(out, value)?;
				frame.finish(out)?;
			}
			BackendMessage::BackendKeyData {
				process_id,
				secret_key,
			} => {
				let frame = begin(out, b'K');
				out.extend_from_slice(&process_id.to_be_bytes());
				out.extend_from_slice(&secret_key.to_be_bytes());
				frame.finish(out)?;
			}
			BackendMessage::ReadyForQuery(status) => {
				let frame = begin(out, b'Z');
				out.push(status.as_byte());
				frame.finish(out)?;
			}
			BackendMessage::CommandComplete(tag) => {
				let frame = begin(out, b'C');
				put_cstr(out, tag)?;
				frame.finish(out)?;
			}
			BackendMessage::RowDescription(names) => {
				let frame = begin(out, b'T');
				out.extend_from_slice(&(names.len() as i16).to_be_bytes());
				for name in names {
					put_cstr(out, name)?;
					out.extend_from_slice(&0i32.to_be_bytes());
					out.extend_from_slice(&0i16.to_be_bytes());
					out.extend_from_slice(&TEXT_OID.to_be_bytes());
					out.extend_from_slice(&(-1i16).to_be_bytes());
					out.extend_from_slice(&(-1i32).to_be_bytes());
					out.extend_from_slice(&0i16.to_be_bytes());
				}
				frame.finish(out)?;
			}
			BackendMessage::DataRow(values) => {
				let frame = begin(out, b'D');
				out.extend_from_slice(&(values.len() as i16).to_be_bytes());
				for value in values {
					match value {
						Some(bytes) => {
							out.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
							out.extend_from_slice(bytes);
						}
						None => out.extend_from_slice(&(-1i32).to_be_bytes()),
					}
				}
				frame.finish(out)?;
			}
			BackendMessage::EmptyQueryResponse => {
				let frame = begin(out, b'I');
				frame.finish(out)?;
			}
			BackendMessage::ErrorResponse(fields) => {
				let frame = begin(out, b'E');
				fields.encode(out)?;
				frame.finish(out)?;
			}
			BackendMessage::NoticeResponse(fields) => {
				let frame = begin(out, b'N');
				fields.encode(out)?;
				frame.finish(out)?;
			}
			BackendMessage::NotificationResponse {
				process_id,
				channel,
				payload,
			} => {
				let frame = begin(out, b'A');
				out.extend_from_slice(&process_id.to_be_bytes());
				put_cstr(out, channel)?;
				put_cstr(out, payload)?;
				frame.finish(out)?;
			}
			BackendMessage::Unknown {
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

	/// Messages the server may send at any time, not only in reply to a
	/// request.
	pub fn is_async(&self) -> bool {
		matches!(
			self,
			BackendMessage::NotificationResponse { .. }
				| BackendMessage::NoticeResponse(_)
				| BackendMessage::ParameterStatus { .. }
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::MAX_MESSAGE_LEN;

	fn encoded(message: &BackendMessage) -> Vec<u8> {
		let mut out = Vec::new();
		message.encode(&mut out).unwrap();
		out
	}

	#[test]
	fn test_notification_with_empty_payload() {
		let bytes = encoded(&BackendMessage::NotificationResponse {
			process_id: 4242,
			channel: "mynotification".to_string(),
			payload: String::new(),
		});

		let (message, consumed) = BackendMessage::decode(&bytes).unwrap().unwrap();
		assert_eq!(consumed, bytes.len());
		match message {
			BackendMessage::NotificationResponse {
				process_id,
				channel,
				payload,
			} => {
				assert_eq!(process_id, 4242);
				assert_eq!(channel, "mynotification");
				assert_eq!(payload, "");
			}
			other => panic!("unexpected message: {:?}", other),
		}
	}

	#[test]
	fn test_notification_wire_layout() {
		let bytes = encoded(&BackendMessage::NotificationResponse {
			process_id: 1,
			channel: "c".to_string(),
			payload: "p".to_string(),
		});
		assert_eq!(bytes, vec![b'A', 0, 0, 0, 12, 0, 0, 0, 1, b'c', 0, b'p', 0]);
	}

	#[test]
	fn test_incomplete_buffer_yields_nothing() {
		let bytes = encoded(&BackendMessage::CommandComplete("NOTIFY".to_string()));

		for cut in 0..bytes.len() {
			assert!(BackendMessage::decode(&bytes[..cut]).unwrap().is_none(), "cut at {}", cut);
		}
	}

	#[test]
	fn test_consecutive_messages() {
		let mut bytes = encoded(&BackendMessage::CommandComplete("LISTEN".to_string()));
		BackendMessage::ReadyForQuery(TransactionStatus::Idle).encode(&mut bytes).unwrap();

		let (first, used) = BackendMessage::decode(&bytes).unwrap().unwrap();
		assert_eq!(first, BackendMessage::CommandComplete("LISTEN".to_string()));

		let (second, rest) = BackendMessage::decode(&bytes[used..]).unwrap().unwrap();
		assert_eq!(second, BackendMessage::ReadyForQuery(TransactionStatus::Idle));
		assert_eq!(used + rest, bytes.len());
	}

	#[test]
	fn test_error_fields() {
		let fields = ErrorFields::new("ERROR", "42601", "syntax error at or near \"FOO\"").with(b'H', "check it");
		let bytes = encoded(&BackendMessage::ErrorResponse(fields.clone()));

		let (message, _) = BackendMessage::decode(&bytes).unwrap().unwrap();
		let BackendMessage::ErrorResponse(decoded) = message else {
			panic!("expected error response");
		};
		assert_eq!(decoded, fields);
		assert_eq!(decoded.severity(), "ERROR");
		assert_eq!(decoded.code(), "42601");
		assert_eq!(decoded.hint(), Some("check it"));
		assert_eq!(decoded.detail(), None);
	}

	#[test]
	fn test_data_row_with_null() {
		let row = BackendMessage::DataRow(vec![Some(b"1".to_vec()), None, Some(Vec::new())]);
		let bytes = encoded(&row);
		assert_eq!(BackendMessage::decode(&bytes).unwrap().unwrap().0, row);
	}

	#[test]
	fn test_row_description_names() {
		let desc = BackendMessage::RowDescription(vec!["pg_notify".to_string(), "x".to_string()]);
		let bytes = encoded(&desc);
		assert_eq!(BackendMessage::decode(&bytes).unwrap().unwrap().0, desc);
	}

	#[test]
	fn test_md5_salt() {
		let auth = BackendMessage::Authentication(Authentication::Md5Password {
			salt: [1, 2, 3, 4],
		});
		let bytes = encoded(&auth);
		assert_eq!(BackendMessage::decode(&bytes).unwrap().unwrap().0, auth);
	}

	#[test]
	fn test_invalid_length() {
		let bytes = [b'A', 0, 0, 0, 2];
		assert!(matches!(BackendMessage::decode(&bytes), Err(WireError::InvalidLength { tag: 'A', .. })));

		let mut huge = vec![b'D'];
		huge.extend_from_slice(&((MAX_MESSAGE_LEN as i32) + 1).to_be_bytes());
		assert!(BackendMessage::decode(&huge).is_err());
	}

	#[test]
	fn test_truncated_body() {
		// length claims 8 bytes of body, but the channel string has no terminator
		let bytes = [b'A', 0, 0, 0, 8, 0, 0, 0, 1];
		assert!(matches!(BackendMessage::decode(&bytes), Err(WireError::MissingNul { tag: 'A' })));
	}

	#[test]
	fn test_unknown_tag_is_preserved() {
		let unknown = BackendMessage::Unknown {
			tag: b'v',
			body: vec![0, 0, 0, 3],
		};
		let bytes = encoded(&unknown);
		assert_eq!(BackendMessage::decode(&bytes).unwrap().unwrap().0, unknown);
	}

	#[test]
	fn test_async_classification() {
		assert!(
			BackendMessage::NotificationResponse {
				process_id: 1,
				channel: "a".into(),
				payload: "b".into(),
			}
			.is_async()
		);
		assert!(!BackendMessage::CommandComplete("SELECT 1".into()).is_async());
	}
}
