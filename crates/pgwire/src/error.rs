// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

#[derive(Debug, thiserror::Error)]
pub enum WireError {
	#[error("invalid message length {len} for message '{tag}'")]
	InvalidLength {
		tag: char,
		len: usize,
	},

	#[error("message '{tag}' is truncated")]
	Truncated {
		tag: char,
	},

	#[error("message '{tag}' has {remaining} trailing bytes")]
	TrailingBytes {
		tag: char,
		remaining: usize,
	},

	#[error("string in message '{tag}' is not NUL terminated")]
	MissingNul {
		tag: char,
	},

	#[error("string in message '{tag}' is not valid UTF-8")]
	InvalidUtf8 {
		tag: char,
	},

	#[error("unknown transaction status {0:#04x}")]
	UnknownTransactionStatus(u8),

	#[error("unsupported protocol version {0}")]
	UnsupportedProtocol(i32),

	#[error("string contains an embedded NUL byte")]
	EmbeddedNul,
}
