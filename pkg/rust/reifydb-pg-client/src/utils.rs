// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

/// Quote an identifier such as a channel name: `a"b` becomes `"a""b"`.
pub(crate) fn quote_ident(ident: &str) -> String {
	format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a string literal as an escape string: `it's` becomes `E'it''s'`
/// and `a\b` becomes `E'a\\b'`. The result reads the same whatever the
/// server's `standard_conforming_strings` setting.
pub(crate) fn quote_literal(value: &str) -> String {
	format!("E'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}
