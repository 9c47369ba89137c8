// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Line grammar for local clients.

use serde_json::value::RawValue;

use crate::error::ErrorKind;

/// One parsed client command.
#[derive(Debug, Clone)]
pub enum Command {
    Ping,
    Info,
    Subs,
    Subscribe { entity_id: String },
    Unsubscribe { sub_id: u64 },
    Get { entity_id: String },
    Call { domain: String, service: String, data: Box<RawValue> },
}

/// Parse one request line.
///
/// `Ok(None)` means the line was empty or whitespace-only and should
/// be ignored. Errors map straight to `err <kind>` replies; `call`
/// validates its JSON tail here, before any correlation id is spent.
pub fn parse(line: &str) -> Result<Option<Command>, ErrorKind> {
    let Some((verb, rest)) = split_token(line) else { return Ok(None) };

    match verb {
        // Zero-argument commands ignore trailing tokens.
        "ping" => Ok(Some(Command::Ping)),
        "info" => Ok(Some(Command::Info)),
        "subs" => Ok(Some(Command::Subs)),
        "sub-state" => {
            let entity_id = one_arg(rest)?;
            Ok(Some(Command::Subscribe { entity_id: entity_id.to_owned() }))
        }
        "unsub" => {
            let sub_id = one_arg(rest)?.parse::<u64>().map_err(|_| ErrorKind::BadArgs)?;
            Ok(Some(Command::Unsubscribe { sub_id }))
        }
        "get" => {
            let entity_id = one_arg(rest)?;
            Ok(Some(Command::Get { entity_id: entity_id.to_owned() }))
        }
        "call" => {
            let (domain, rest) = split_token(rest).ok_or(ErrorKind::BadArgs)?;
            let (service, rest) = split_token(rest).ok_or(ErrorKind::BadArgs)?;
            let data = service_data(rest)?;
            Ok(Some(Command::Call {
                domain: domain.to_owned(),
                service: service.to_owned(),
                data,
            }))
        }
        _ => Err(ErrorKind::Unknown),
    }
}

/// Split off the next whitespace-delimited token, returning it with
/// the unconsumed remainder.
fn split_token(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    match s.find(char::is_whitespace) {
        Some(idx) => Some((&s[..idx], &s[idx..])),
        None => Some((s, "")),
    }
}

/// Exactly one argument token.
fn one_arg(rest: &str) -> Result<&str, ErrorKind> {
    let (arg, tail) = split_token(rest).ok_or(ErrorKind::BadArgs)?;
    if split_token(tail).is_some() {
        return Err(ErrorKind::BadArgs);
    }
    Ok(arg)
}

/// Validate the trailing service-data JSON; an empty tail means `{}`.
fn service_data(rest: &str) -> Result<Box<RawValue>, ErrorKind> {
    let rest = rest.trim();
    let text = if rest.is_empty() { "{}" } else { rest };
    RawValue::from_string(text.to_owned()).map_err(|_| ErrorKind::BadJson)
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
