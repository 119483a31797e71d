use crate::Role;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthzError {
    #[error("invalid role name: {0}")]
    InvalidRoleName(String),
    #[error("unknown role bits: {0:#x}")]
    UnknownRoleBits(u32),
    #[error("role {0} cannot be assigned to a group")]
    NotAssignable(Role),
}

pub type AuthzResult<T> = Result<T, AuthzError>;
