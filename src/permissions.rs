//! Permission evaluation.
//!
//! Permissions are persisted as a 9-character Unix-style string such as
//! `rwxr-xr-x`, three triples for owner, group and other. Internally they are
//! held as flags. Groups are not modelled: every caller who is not the exact
//! owner is evaluated against the "other" triple, and a node without an owner
//! has no owner at all.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::node::{Node, UserId};

/// Malformed permission string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid permission string {0:?}: expected 9 characters like \"rwxr-xr-x\"")]
pub struct InvalidPermissions(pub String);

/// Read/write/execute flags for one class of caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Triple {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl Triple {
    pub const fn new(read: bool, write: bool, execute: bool) -> Self {
        Self { read, write, execute }
    }

    fn parse(chunk: &[u8]) -> Option<Self> {
        let flag = |c: u8, set: u8| match c {
            b'-' => Some(false),
            c if c == set => Some(true),
            _ => None,
        };
        Some(Self {
            read: flag(chunk[0], b'r')?,
            write: flag(chunk[1], b'w')?,
            execute: flag(chunk[2], b'x')?,
        })
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bit = |on: bool, c: char| if on { c } else { '-' };
        write!(
            f,
            "{}{}{}",
            bit(self.read, 'r'),
            bit(self.write, 'w'),
            bit(self.execute, 'x')
        )
    }
}

/// Owner, group and other triples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Permissions {
    pub owner: Triple,
    pub group: Triple,
    pub other: Triple,
}

impl Permissions {
    /// `rwxr-xr-x`
    pub const DIRECTORY_DEFAULT: Self = Self {
        owner: Triple::new(true, true, true),
        group: Triple::new(true, false, true),
        other: Triple::new(true, false, true),
    };

    /// `rw-r--r--`
    pub const FILE_DEFAULT: Self = Self {
        owner: Triple::new(true, true, false),
        group: Triple::new(true, false, false),
        other: Triple::new(true, false, false),
    };

    /// `rwx------`
    pub const PRIVATE_DIRECTORY: Self = Self {
        owner: Triple::new(true, true, true),
        group: Triple::new(false, false, false),
        other: Triple::new(false, false, false),
    };

    /// `rwxrwxrwx`
    pub const WORLD_WRITABLE: Self = Self {
        owner: Triple::new(true, true, true),
        group: Triple::new(true, true, true),
        other: Triple::new(true, true, true),
    };

    /// The triple that applies to a caller.
    pub fn for_caller(&self, is_owner: bool) -> Triple {
        if is_owner { self.owner } else { self.other }
    }
}

impl FromStr for Permissions {
    type Err = InvalidPermissions;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 9 {
            return Err(InvalidPermissions(s.to_string()));
        }
        let triple = |i: usize| {
            Triple::parse(&bytes[i..i + 3]).ok_or_else(|| InvalidPermissions(s.to_string()))
        };
        Ok(Self {
            owner: triple(0)?,
            group: triple(3)?,
            other: triple(6)?,
        })
    }
}

impl TryFrom<String> for Permissions {
    type Error = InvalidPermissions;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Permissions> for String {
    fn from(value: Permissions) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.owner, self.group, self.other)
    }
}

/// Applicable triple for `user` on `node`.
fn triple(node: &Node, user: UserId) -> Triple {
    node.permissions.for_caller(node.is_owned_by(user))
}

pub fn can_read(node: &Node, user: UserId) -> bool {
    triple(node, user).read
}

pub fn can_write(node: &Node, user: UserId) -> bool {
    triple(node, user).write
}

/// Execute on a directory means it may be traversed.
pub fn can_execute(node: &Node, user: UserId) -> bool {
    triple(node, user).execute
}
