//! MMS value variants carried between model, server and client sessions.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MmsType {
    Boolean,
    Integer,
    Unsigned,
    Float,
    VisibleString,
    MmsString,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MmsValue {
    Boolean(bool),
    Integer(i64),
    Unsigned(u32),
    Float(f64),
    VisibleString(String),
    MmsString(String),
}

impl MmsValue {
    pub fn mms_type(&self) -> MmsType {
        match self {
            MmsValue::Boolean(_) => MmsType::Boolean,
            MmsValue::Integer(_) => MmsType::Integer,
            MmsValue::Unsigned(_) => MmsType::Unsigned,
            MmsValue::Float(_) => MmsType::Float,
            MmsValue::VisibleString(_) => MmsType::VisibleString,
            MmsValue::MmsString(_) => MmsType::MmsString,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MmsValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MmsValue::Integer(v) => Some(*v),
            MmsValue::Unsigned(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            MmsValue::Unsigned(v) => Some(*v),
            MmsValue::Integer(v) => u32::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MmsValue::Float(v) => Some(*v),
            MmsValue::Integer(v) => Some(*v as f64),
            MmsValue::Unsigned(v) => Some(f64::from(*v)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MmsValue::VisibleString(s) | MmsValue::MmsString(s) => Some(s),
            _ => None,
        }
    }
}
