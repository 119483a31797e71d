//! Privilege bitset and tier normalization.
//!
//! A [`Role`] is a set of bits. Five of them are base tiers, totally ordered
//! `OWNER > ADMIN > POWER_USER_PLUS > POWER_USER > BASIC`; the sixth,
//! [`Role::AUDITOR`], is an orthogonal modifier granting read visibility.
//!
//! Merging roles from several sources is a plain bitwise OR followed by
//! [`Role::normalize_to_highest_role`], which keeps only the highest tier.
//!
//! # Wire format
//! Serialized as the integer bit value (`{"role": 40}` is Admin|Auditor).
//! The human-readable form used in logs and config is kebab-case names
//! joined by `|`, e.g. `power-user-plus|auditor`.

use crate::{AuthzError, AuthzResult};
use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

bitflags! {
    /// Privilege bits carried by users and group-role assignments.
    ///
    /// | Bit | Meaning |
    /// |-----|---------|
    /// | [`BASIC`](Self::BASIC) | default tier, no workspace |
    /// | [`POWER_USER`](Self::POWER_USER) | personal workspace |
    /// | [`POWER_USER_PLUS`](Self::POWER_USER_PLUS) | workspace with a generated access-control rule |
    /// | [`ADMIN`](Self::ADMIN) | platform administration |
    /// | [`OWNER`](Self::OWNER) | full control, may grant Owner and Auditor |
    /// | [`AUDITOR`](Self::AUDITOR) | read-only visibility modifier |
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Role: u32 {
        const BASIC           = 1;
        const POWER_USER      = 1 << 1;
        const POWER_USER_PLUS = 1 << 2;
        const ADMIN           = 1 << 3;
        const OWNER           = 1 << 4;
        const AUDITOR         = 1 << 5;
    }
}

/// Base tiers from highest to lowest.
const TIERS_DESCENDING: [Role; 5] = [
    Role::OWNER,
    Role::ADMIN,
    Role::POWER_USER_PLUS,
    Role::POWER_USER,
    Role::BASIC,
];

const ASSIGNABLE_TIERS: [Role; 4] = [
    Role::OWNER,
    Role::ADMIN,
    Role::POWER_USER_PLUS,
    Role::POWER_USER,
];

const NAMES: [(Role, &str); 6] = [
    (Role::OWNER, "owner"),
    (Role::ADMIN, "admin"),
    (Role::POWER_USER_PLUS, "power-user-plus"),
    (Role::POWER_USER, "power-user"),
    (Role::BASIC, "basic"),
    (Role::AUDITOR, "auditor"),
];

impl Role {
    /// True when `bit` is fully contained in this role.
    #[must_use]
    pub fn has_role(self, bit: Role) -> bool {
        !bit.is_empty() && self.contains(bit)
    }

    #[must_use]
    pub fn has_auditor_role(self) -> bool {
        self.contains(Self::AUDITOR)
    }

    /// Strips the Auditor modifier, leaving only tier bits.
    #[must_use]
    pub fn extract_base_role(self) -> Role {
        self.difference(Self::AUDITOR)
    }

    /// True when the tier bits of this role equal `tier` exactly.
    ///
    /// `ADMIN | AUDITOR` is exactly Admin; `ADMIN | OWNER` is not.
    #[must_use]
    pub fn is_exact_base_role(self, tier: Role) -> bool {
        self.extract_base_role() == tier
    }

    /// Collapses any combination of bits to exactly one base tier.
    ///
    /// The highest tier present wins and Basic is the fallback when no tier
    /// bit is set. The Auditor bit survives unchanged. The operation is
    /// idempotent and, because it only inspects the union of bits, the same
    /// for any order in which the inputs were OR'd together.
    ///
    /// ```
    /// use gatehouse_authz::Role;
    ///
    /// let merged = Role::POWER_USER | Role::ADMIN | Role::AUDITOR;
    /// assert_eq!(merged.normalize_to_highest_role(), Role::ADMIN | Role::AUDITOR);
    /// assert_eq!(Role::AUDITOR.normalize_to_highest_role(), Role::BASIC | Role::AUDITOR);
    /// ```
    #[must_use]
    pub fn normalize_to_highest_role(self) -> Role {
        let auditor = self & Self::AUDITOR;
        let tier = TIERS_DESCENDING
            .into_iter()
            .find(|tier| self.contains(*tier))
            .unwrap_or(Self::BASIC);
        tier | auditor
    }

    /// Rank of the highest tier bit: Basic=0 through Owner=4.
    #[must_use]
    pub fn tier_rank(self) -> u8 {
        let base = self.normalize_to_highest_role().extract_base_role();
        match base {
            b if b == Self::OWNER => 4,
            b if b == Self::ADMIN => 3,
            b if b == Self::POWER_USER_PLUS => 2,
            b if b == Self::POWER_USER => 1,
            _ => 0,
        }
    }

    /// Whether this role warrants a personal workspace (tier ≥ PowerUser).
    #[must_use]
    pub fn is_privileged(self) -> bool {
        self.tier_rank() >= Self::POWER_USER.tier_rank()
    }

    /// Whether a workspace at this role gets the wildcard default rule.
    #[must_use]
    pub fn has_generated_acr_tier(self) -> bool {
        self.tier_rank() > Self::POWER_USER.tier_rank()
    }

    /// Exactly one of Owner/Admin/PowerUserPlus/PowerUser, optionally with
    /// Auditor, and nothing else.
    #[must_use]
    pub fn is_assignable(self) -> bool {
        let base = self.extract_base_role();
        ASSIGNABLE_TIERS.contains(&base)
    }

    /// Granting Owner or Auditor is reserved to Owners.
    #[must_use]
    pub fn requires_owner_to_grant(self) -> bool {
        self.intersects(Self::OWNER | Self::AUDITOR)
    }

    /// Validates a role received from a caller for a group assignment.
    pub fn ensure_assignable(self) -> AuthzResult<Role> {
        if self.is_assignable() {
            Ok(self)
        } else {
            Err(AuthzError::NotAssignable(self))
        }
    }

    /// Strict decoding of a wire integer; unknown bits are rejected.
    pub fn try_from_bits(bits: u32) -> AuthzResult<Role> {
        Self::from_bits(bits).ok_or(AuthzError::UnknownRoleBits(bits))
    }
}

impl Default for Role {
    fn default() -> Self {
        Self::BASIC
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("unknown");
        }
        let mut first = true;
        for (bit, name) in NAMES {
            if self.contains(bit) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

impl FromStr for Role {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut role = Role::empty();
        for part in s.split('|') {
            let part = part.trim().to_ascii_lowercase();
            let bit = NAMES
                .iter()
                .find(|(_, name)| *name == part)
                .map(|(bit, _)| *bit)
                .ok_or_else(|| AuthzError::InvalidRoleName(s.to_string()))?;
            role |= bit;
        }
        Ok(role)
    }
}

impl Serialize for Role {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.bits())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u32::deserialize(deserializer)?;
        Role::try_from_bits(bits).map_err(serde::de::Error::custom)
    }
}
