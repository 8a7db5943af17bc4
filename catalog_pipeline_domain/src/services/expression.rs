// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Policy Expressions
//!
//! Boolean expressions over attribute sets. Fileclass definitions, whitelist
//! entries and alert rules are all written in this small language, loaded
//! from configuration (the tree derives serde) and evaluated against the
//! merged attributes of an entry.
//!
//! Evaluation is three-valued: an expression can match, not match, or fail
//! because an attribute it references is absent from the set. Callers decide
//! what a missing attribute means at their site; the evaluator never guesses.
//!
//! ## Example
//!
//! ```
//! use catalog_pipeline_domain::services::expression::{CmpField, CmpOp, CmpValue, Condition, PolicyExpr};
//! use catalog_pipeline_domain::AttrSet;
//!
//! // size > 1 GiB and path under /fs/scratch
//! let expr = PolicyExpr::And(vec![
//!     PolicyExpr::cmp(CmpField::Size, CmpOp::Gt, CmpValue::Int(1 << 30)),
//!     PolicyExpr::cmp(CmpField::Fullpath, CmpOp::Like, CmpValue::Str("/fs/scratch/*".into())),
//! ]);
//!
//! let mut attrs = AttrSet::new();
//! attrs.size = Some(2 << 30);
//! attrs.fullpath = Some("/fs/scratch/job42/out.bin".into());
//! assert_eq!(expr.evaluate(&attrs), Ok(true));
//! ```

use crate::value_objects::attr_set::{AttrMask, AttrSet, FsKind};
use crate::value_objects::hsm_status::HsmStatus;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Attribute referenced by a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpField {
    Fullpath,
    Name,
    Kind,
    Owner,
    Group,
    Size,
    Depth,
    LastAccess,
    LastMod,
    CreationTime,
    Status,
    LastArchive,
    LastRestore,
    ArchiveClass,
    ReleaseClass,
}

impl CmpField {
    /// Mask bit of the referenced attribute.
    pub fn attr_mask(self) -> AttrMask {
        match self {
            Self::Fullpath => AttrMask::FULLPATH,
            Self::Name => AttrMask::NAME,
            Self::Kind => AttrMask::KIND,
            Self::Owner => AttrMask::OWNER,
            Self::Group => AttrMask::GROUP,
            Self::Size => AttrMask::SIZE,
            Self::Depth => AttrMask::DEPTH,
            Self::LastAccess => AttrMask::LAST_ACCESS,
            Self::LastMod => AttrMask::LAST_MOD,
            Self::CreationTime => AttrMask::CREATION_TIME,
            Self::Status => AttrMask::STATUS,
            Self::LastArchive => AttrMask::LAST_ARCHIVE,
            Self::LastRestore => AttrMask::LAST_RESTORE,
            Self::ArchiveClass => AttrMask::ARCHIVE_CLASS,
            Self::ReleaseClass => AttrMask::RELEASE_CLASS,
        }
    }
}

/// Comparison operator. `Like` is a glob match (`*` and `?`) on string
/// attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Like,
}

/// Literal operand of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CmpValue {
    Int(i64),
    Str(String),
    Kind(FsKind),
    Status(HsmStatus),
}

/// One attribute comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub attr: CmpField,
    pub op: CmpOp,
    pub value: CmpValue,
}

/// Boolean expression tree over attribute comparisons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyExpr {
    Cmp(Condition),
    And(Vec<PolicyExpr>),
    Or(Vec<PolicyExpr>),
    Not(Box<PolicyExpr>),
}

/// Evaluation failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExprError {
    #[error("attribute '{0}' is not set")]
    MissingAttr(&'static str),
    #[error("operator {0:?} is not applicable to attribute '{1}'")]
    BadOperator(CmpOp, &'static str),
}

impl PolicyExpr {
    pub fn cmp(attr: CmpField, op: CmpOp, value: CmpValue) -> Self {
        Self::Cmp(Condition { attr, op, value })
    }

    /// Union of the attribute bits this expression reads.
    pub fn attr_mask(&self) -> AttrMask {
        match self {
            Self::Cmp(c) => c.attr.attr_mask(),
            Self::And(children) | Self::Or(children) => {
                let mut mask = AttrMask::EMPTY;
                for child in children {
                    mask |= child.attr_mask();
                }
                mask
            }
            Self::Not(child) => child.attr_mask(),
        }
    }

    /// Evaluates against an attribute set.
    ///
    /// # Errors
    ///
    /// [`ExprError::MissingAttr`] when a referenced attribute is absent, and
    /// [`ExprError::BadOperator`] for operator/attribute mismatches (which a
    /// well-formed configuration never produces).
    pub fn evaluate(&self, attrs: &AttrSet) -> Result<bool, ExprError> {
        match self {
            Self::Cmp(cond) => eval_condition(cond, attrs),
            Self::And(children) => {
                for child in children {
                    if !child.evaluate(attrs)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Or(children) => {
                for child in children {
                    if child.evaluate(attrs)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Not(child) => Ok(!child.evaluate(attrs)?),
        }
    }
}

impl fmt::Display for PolicyExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cmp(c) => {
                let op = match c.op {
                    CmpOp::Eq => "==",
                    CmpOp::Ne => "!=",
                    CmpOp::Gt => ">",
                    CmpOp::Ge => ">=",
                    CmpOp::Lt => "<",
                    CmpOp::Le => "<=",
                    CmpOp::Like => "like",
                };
                let value = match &c.value {
                    CmpValue::Int(v) => v.to_string(),
                    CmpValue::Str(v) => format!("\"{v}\""),
                    CmpValue::Kind(v) => v.to_string(),
                    CmpValue::Status(v) => v.to_string(),
                };
                write!(f, "{:?} {} {}", c.attr, op, value)
            }
            Self::And(children) => write_joined(f, children, " and "),
            Self::Or(children) => write_joined(f, children, " or "),
            Self::Not(child) => write!(f, "not ({child})"),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, children: &[PolicyExpr], sep: &str) -> fmt::Result {
    write!(f, "(")?;
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{child}")?;
    }
    write!(f, ")")
}

fn eval_condition(cond: &Condition, attrs: &AttrSet) -> Result<bool, ExprError> {
    let name = field_name(cond.attr);

    match (&cond.value, cond.attr) {
        (CmpValue::Int(rhs), _) => {
            let lhs = int_field(cond.attr, attrs).ok_or(ExprError::MissingAttr(name))?;
            compare_ord(lhs, *rhs, cond.op, name)
        }
        // kind/status literals arrive as strings from configuration files
        (CmpValue::Str(rhs), CmpField::Kind) => {
            let lhs = attrs.kind.ok_or(ExprError::MissingAttr(name))?;
            let rhs: FsKind = rhs.parse().map_err(|_| ExprError::BadOperator(cond.op, name))?;
            match cond.op {
                CmpOp::Eq => Ok(lhs == rhs),
                CmpOp::Ne => Ok(lhs != rhs),
                other => Err(ExprError::BadOperator(other, name)),
            }
        }
        (CmpValue::Str(rhs), CmpField::Status) => {
            let lhs = attrs.status.ok_or(ExprError::MissingAttr(name))?;
            let rhs: HsmStatus = rhs.parse().map_err(|_| ExprError::BadOperator(cond.op, name))?;
            match cond.op {
                CmpOp::Eq => Ok(lhs == rhs),
                CmpOp::Ne => Ok(lhs != rhs),
                other => Err(ExprError::BadOperator(other, name)),
            }
        }
        (CmpValue::Str(rhs), _) => {
            let lhs = str_field(cond.attr, attrs).ok_or(ExprError::MissingAttr(name))?;
            match cond.op {
                CmpOp::Eq => Ok(lhs == rhs.as_str()),
                CmpOp::Ne => Ok(lhs != rhs.as_str()),
                CmpOp::Like => Ok(glob_match(rhs, lhs)),
                other => Err(ExprError::BadOperator(other, name)),
            }
        }
        (CmpValue::Kind(rhs), CmpField::Kind) => {
            let lhs = attrs.kind.ok_or(ExprError::MissingAttr(name))?;
            match cond.op {
                CmpOp::Eq => Ok(lhs == *rhs),
                CmpOp::Ne => Ok(lhs != *rhs),
                other => Err(ExprError::BadOperator(other, name)),
            }
        }
        (CmpValue::Status(rhs), CmpField::Status) => {
            let lhs = attrs.status.ok_or(ExprError::MissingAttr(name))?;
            match cond.op {
                CmpOp::Eq => Ok(lhs == *rhs),
                CmpOp::Ne => Ok(lhs != *rhs),
                other => Err(ExprError::BadOperator(other, name)),
            }
        }
        (_, _) => Err(ExprError::BadOperator(cond.op, name)),
    }
}

fn compare_ord(lhs: i64, rhs: i64, op: CmpOp, name: &'static str) -> Result<bool, ExprError> {
    match op {
        CmpOp::Eq => Ok(lhs == rhs),
        CmpOp::Ne => Ok(lhs != rhs),
        CmpOp::Gt => Ok(lhs > rhs),
        CmpOp::Ge => Ok(lhs >= rhs),
        CmpOp::Lt => Ok(lhs < rhs),
        CmpOp::Le => Ok(lhs <= rhs),
        CmpOp::Like => Err(ExprError::BadOperator(CmpOp::Like, name)),
    }
}

fn int_field(field: CmpField, attrs: &AttrSet) -> Option<i64> {
    match field {
        CmpField::Size => attrs.size.map(|v| v as i64),
        CmpField::Depth => attrs.depth.map(i64::from),
        CmpField::LastAccess => attrs.last_access,
        CmpField::LastMod => attrs.last_mod,
        CmpField::CreationTime => attrs.creation_time,
        CmpField::LastArchive => attrs.last_archive,
        CmpField::LastRestore => attrs.last_restore,
        _ => None,
    }
}

fn str_field(field: CmpField, attrs: &AttrSet) -> Option<&str> {
    match field {
        CmpField::Fullpath => attrs.fullpath.as_deref(),
        CmpField::Name => attrs.name.as_deref(),
        CmpField::Owner => attrs.owner.as_deref(),
        CmpField::Group => attrs.group.as_deref(),
        CmpField::ArchiveClass => attrs.archive_class.as_deref(),
        CmpField::ReleaseClass => attrs.release_class.as_deref(),
        _ => None,
    }
}

fn field_name(field: CmpField) -> &'static str {
    match field {
        CmpField::Fullpath => "fullpath",
        CmpField::Name => "name",
        CmpField::Kind => "type",
        CmpField::Owner => "owner",
        CmpField::Group => "group",
        CmpField::Size => "size",
        CmpField::Depth => "depth",
        CmpField::LastAccess => "last_access",
        CmpField::LastMod => "last_mod",
        CmpField::CreationTime => "creation_time",
        CmpField::Status => "status",
        CmpField::LastArchive => "last_archive",
        CmpField::LastRestore => "last_restore",
        CmpField::ArchiveClass => "archive_class",
        CmpField::ReleaseClass => "release_class",
    }
}

/// Glob match with `*` (any run) and `?` (any single character), anchored at
/// both ends. The pattern is translated to a regex; an invalid translation
/// (impossible with escaped input) fails closed.
fn glob_match(pattern: &str, candidate: &str) -> bool {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    regex::Regex::new(&re).map(|r| r.is_match(candidate)).unwrap_or(false)
}
