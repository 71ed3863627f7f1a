//! Identity management.
//!
//! Directory lookups (an LDAP service in production deployments) are an
//! external collaborator; this module defines the interface the rest of
//! the system consumes, an implementation over the operating system's
//! account databases, and a static implementation for fixed deployments
//! and tests.

use std::collections::HashMap;

use nix::unistd::{self, Gid, Uid};

use crate::error::{Error, Result};

/// A resolved user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub uid: u32,
    pub name: String,
    /// Deliverable address; for OS-database users this is the local
    /// mailbox (the account name).
    pub email: String,
}

/// A resolved group with its owners and members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub gid: u32,
    pub name: String,
    pub owners: Vec<User>,
    pub members: Vec<User>,
}

impl Group {
    /// The owners' user IDs.
    pub fn owner_uids(&self) -> Vec<u32> {
        self.owners.iter().map(|u| u.uid).collect()
    }
}

/// Lookup interface over whatever identity store a deployment uses.
pub trait IdentityManager {
    /// Resolve a user by POSIX ID; `None` when no such user exists.
    fn user(&self, uid: u32) -> Result<Option<User>>;

    /// Resolve a group by POSIX ID; `None` when no such group exists.
    fn group(&self, gid: u32) -> Result<Option<Group>>;
}

/// Identity manager over the operating system's passwd/group databases.
///
/// Unix groups carry no owner attribute, so the member list stands in for
/// the owner list; `min_group_owners` applies to it unchanged.
#[derive(Debug, Default)]
pub struct UnixIdm;

impl UnixIdm {
    fn resolve_member(name: &str) -> Result<Option<User>> {
        let user = unistd::User::from_name(name)
            .map_err(|e| Error::io(format!("failed to look up user '{name}'"), e.into()))?;

        Ok(user.map(|u| User {
            uid: u.uid.as_raw(),
            name: u.name.clone(),
            email: u.name,
        }))
    }
}

impl IdentityManager for UnixIdm {
    fn user(&self, uid: u32) -> Result<Option<User>> {
        let user = unistd::User::from_uid(Uid::from_raw(uid))
            .map_err(|e| Error::io(format!("failed to look up uid {uid}"), e.into()))?;

        Ok(user.map(|u| User {
            uid,
            name: u.name.clone(),
            email: u.name,
        }))
    }

    fn group(&self, gid: u32) -> Result<Option<Group>> {
        let group = unistd::Group::from_gid(Gid::from_raw(gid))
            .map_err(|e| Error::io(format!("failed to look up gid {gid}"), e.into()))?;

        let Some(group) = group else {
            return Ok(None);
        };

        let mut members = Vec::new();
        for name in &group.mem {
            if let Some(user) = Self::resolve_member(name)? {
                members.push(user);
            }
        }

        Ok(Some(Group {
            gid,
            name: group.name,
            owners: members.clone(),
            members,
        }))
    }
}

/// Identity manager over a fixed in-memory map.
#[derive(Debug, Default)]
pub struct StaticIdm {
    users: HashMap<u32, User>,
    groups: HashMap<u32, Group>,
}

impl StaticIdm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&mut self, uid: u32, name: &str) -> &mut Self {
        self.users.insert(
            uid,
            User {
                uid,
                name: name.to_string(),
                email: name.to_string(),
            },
        );
        self
    }

    /// Register a group; owner and member uids must already be added.
    pub fn add_group(&mut self, gid: u32, owners: &[u32], members: &[u32]) -> &mut Self {
        let resolve = |uids: &[u32]| -> Vec<User> {
            uids.iter()
                .filter_map(|uid| self.users.get(uid).cloned())
                .collect()
        };

        let group = Group {
            gid,
            name: format!("g{gid}"),
            owners: resolve(owners),
            members: resolve(members),
        };
        self.groups.insert(gid, group);
        self
    }
}

impl IdentityManager for StaticIdm {
    fn user(&self, uid: u32) -> Result<Option<User>> {
        Ok(self.users.get(&uid).cloned())
    }

    fn group(&self, gid: u32) -> Result<Option<Group>> {
        Ok(self.groups.get(&gid).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_idm_lookup() {
        let mut idm = StaticIdm::new();
        idm.add_user(1001, "alice").add_user(3001, "pi");
        idm.add_group(2001, &[3001], &[1001, 3001]);

        let user = idm.user(1001).unwrap().unwrap();
        assert_eq!(user.name, "alice");

        let group = idm.group(2001).unwrap().unwrap();
        assert_eq!(group.owner_uids(), vec![3001]);
        assert_eq!(group.members.len(), 2);

        assert!(idm.user(9999).unwrap().is_none());
        assert!(idm.group(9999).unwrap().is_none());
    }

    #[test]
    fn test_unix_idm_resolves_root() {
        let idm = UnixIdm;
        let root = idm.user(0).unwrap().expect("uid 0 should exist");
        assert_eq!(root.name, "root");

        let group = idm.group(0).unwrap().expect("gid 0 should exist");
        assert_eq!(group.gid, 0);
    }
}
