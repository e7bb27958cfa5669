// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! The handful of statements the test server understands.

use std::{
	iter::Peekable,
	str::Chars,
	time::Duration,
};

/// Longest payload `NOTIFY` accepts.
pub const MAX_PAYLOAD_LEN: usize = 7999;

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
	Listen(String),
	/// `None` for `UNLISTEN *`.
	Unlisten(Option<String>),
	Notify {
		channel: String,
		payload: String,
	},
	/// `SELECT pg_notify('channel', 'payload')`
	PgNotify {
		channel: String,
		payload: String,
	},
	SelectInt(i64),
	SelectBackendPid,
	SelectSleep(Duration),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
	/// Unquoted word, folded to lower case.
	Word(String),
	QuotedIdent(String),
	Literal(String),
	Number(String),
	Symbol(char),
}

impl Token {
	fn text(&self) -> String {
		match self {
			Token::Word(w) | Token::Number(w) => w.clone(),
			Token::QuotedIdent(i) => format!("\"{}\"", i),
			Token::Literal(l) => format!("'{}'", l),
			Token::Symbol(c) => c.to_string(),
		}
	}
}

/// Split a simple query into statements on `;` outside quotes. Blank
/// statements are dropped.
pub fn split(sql: &str) -> Vec<&str> {
	let mut statements = Vec::new();
	let mut quote = None;
	// inside an E'..' string, where a backslash escapes the next char
	let mut escapes = false;
	let mut skip = false;
	let mut prev = None;
	let mut start = 0;

	for (idx, c) in sql.char_indices() {
		if skip {
			skip = false;
			prev = Some(c);
			continue;
		}
		match (quote, c) {
			(None, '\'' | '"') => {
				escapes = c == '\'' && (matches!(prev, Some('e' | 'E')) || (escapes && prev == Some('\'')));
				quote = Some(c);
			}
			(Some('\''), '\\') if escapes => skip = true,
			(Some(q), c) if c == q => quote = None,
			(None, ';') => {
				statements.push(&sql[start..idx]);
				start = idx + 1;
			}
			_ => {}
		}
		prev = Some(c);
	}
	statements.push(&sql[start..]);

	statements.into_iter().map(str::trim).filter(|s| !s.is_empty()).collect()
}

/// Parse one statement. The error is the SQLSTATE and message to report.
pub fn parse(sql: &str) -> Result<Statement, (&'static str, String)> {
	let tokens = tokenize(sql).map_err(|msg| ("42601", msg))?;

	use Token::*;
	let statement = match tokens.as_slice() {
		[Word(kw), channel] if kw == "listen" => Statement::Listen(ident(channel)?),
		[Word(kw), Symbol('*')] if kw == "unlisten" => Statement::Unlisten(None),
		[Word(kw), channel] if kw == "unlisten" => Statement::Unlisten(Some(ident(channel)?)),
		[Word(kw), channel] if kw == "notify" => Statement::Notify {
			channel: ident(channel)?,
			payload: String::new(),
		},
		[Word(kw), channel, Symbol(','), Literal(payload)] if kw == "notify" => Statement::Notify {
			channel: ident(channel)?,
			payload: payload.clone(),
		},
		[Word(kw), Word(f), Symbol('('), Literal(channel), Symbol(','), Literal(payload), Symbol(')')]
			if kw == "select" && f == "pg_notify" =>
		{
			Statement::PgNotify {
				channel: channel.clone(),
				payload: payload.clone(),
			}
		}
		[Word(kw), Word(f), Symbol('('), Symbol(')')] if kw == "select" && f == "pg_backend_pid" => {
			Statement::SelectBackendPid
		}
		[Word(kw), Word(f), Symbol('('), Number(secs), Symbol(')')] if kw == "select" && f == "pg_sleep" => {
			let secs: f64 = secs.parse().map_err(|_| ("22P02", format!("invalid input syntax for type double precision: \"{}\"", secs)))?;
			Statement::SelectSleep(Duration::from_secs_f64(secs.max(0.0)))
		}
		[Word(kw), Number(n)] if kw == "select" => {
			let value = n.parse().map_err(|_| ("22003", format!("value \"{}\" is out of range", n)))?;
			Statement::SelectInt(value)
		}
		[Word(kw), Symbol('-'), Number(n)] if kw == "select" => {
			let value: i64 = n.parse().map_err(|_| ("22003", format!("value \"-{}\" is out of range", n)))?;
			Statement::SelectInt(-value)
		}
		[first, ..] => return Err(("42601", format!("syntax error at or near \"{}\"", first.text()))),
		[] => return Err(("42601", "syntax error at end of input".to_string())),
	};

	match &statement {
		Statement::Notify {
			channel,
			payload,
		}
		| Statement::PgNotify {
			channel,
			payload,
		} => {
			if channel.is_empty() {
				return Err(("22023", "channel name cannot be empty".to_string()));
			}
			if payload.len() > MAX_PAYLOAD_LEN {
				return Err(("22023", "payload string too long".to_string()));
			}
		}
		_ => {}
	}

	Ok(statement)
}

fn ident(token: &Token) -> Result<String, (&'static str, String)> {
	match token {
		Token::Word(w) => Ok(w.clone()),
		Token::QuotedIdent(i) => Ok(i.clone()),
		other => Err(("42601", format!("syntax error at or near \"{}\"", other.text()))),
	}
}

fn tokenize(sql: &str) -> Result<Vec<Token>, String> {
	let mut tokens = Vec::new();
	let mut chars = sql.chars().peekable();

	while let Some(&c) = chars.peek() {
		if c.is_whitespace() {
			chars.next();
		} else if matches!(c, 'e' | 'E') && starts_escape_string(&chars) {
			chars.next();
			chars.next();
			tokens.push(Token::Literal(escape_string(&mut chars)?));
		} else if c == '\'' || c == '"' {
			chars.next();
			let mut value = String::new();
			loop {
				match chars.next() {
					Some(q) if q == c => {
						// doubled quote is an escaped quote
						if chars.peek() == Some(&c) {
							chars.next();
							value.push(c);
						} else {
							break;
						}
					}
					Some(other) => value.push(other),
					None => return Err("unterminated quoted string".to_string()),
				}
			}
			tokens.push(if c == '\'' {
				Token::Literal(value)
			} else {
				Token::QuotedIdent(value)
			});
		} else if c.is_ascii_digit() {
			let mut number = String::new();
			while let Some(&d) = chars.peek() {
				if d.is_ascii_digit() || d == '.' {
					number.push(d);
					chars.next();
				} else {
					break;
				}
			}
			tokens.push(Token::Number(number));
		} else if c.is_alphabetic() || c == '_' {
			let mut word = String::new();
			while let Some(&w) = chars.peek() {
				if w.is_alphanumeric() || w == '_' || w == '$' {
					word.push(w.to_ascii_lowercase());
					chars.next();
				} else {
					break;
				}
			}
			tokens.push(Token::Word(word));
		} else {
			tokens.push(Token::Symbol(c));
			chars.next();
		}
	}

	Ok(tokens)
}

fn starts_escape_string(chars: &Peekable<Chars<'_>>) -> bool {
	let mut ahead = chars.clone();
	ahead.next();
	ahead.next() == Some('\'')
}

/// Body of an `E'..'` literal, after the opening quote.
fn escape_string(chars: &mut Peekable<Chars<'_>>) -> Result<String, String> {
	let mut value = String::new();
	loop {
		match chars.next() {
			Some('\'') if chars.peek() == Some(&'\'') => {
				chars.next();
				value.push('\'');
			}
			Some('\'') => return Ok(value),
			Some('\\') => match chars.next() {
				Some('n') => value.push('\n'),
				Some('t') => value.push('\t'),
				Some('r') => value.push('\r'),
				Some('b') => value.push('\u{8}'),
				Some('f') => value.push('\u{c}'),
				Some(other) => value.push(other),
				None => break,
			},
			Some(other) => value.push(other),
			None => break,
		}
	}
	Err("unterminated quoted string".to_string())
}
