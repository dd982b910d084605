use std::collections::HashSet;

/// Channel and role allowlists. An empty list allows everything.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    channels: HashSet<u64>,
    roles: HashSet<u64>,
}

impl AccessPolicy {
    pub fn new(channels: HashSet<u64>, roles: HashSet<u64>) -> Self {
        Self { channels, roles }
    }

    pub fn channel_allowed(&self, channel_id: u64) -> bool {
        self.channels.is_empty() || self.channels.contains(&channel_id)
    }

    /// `author_roles` is empty for direct messages, which carry no roles.
    pub fn roles_allowed(&self, author_roles: &[u64]) -> bool {
        self.roles.is_empty() || author_roles.iter().any(|role| self.roles.contains(role))
    }

    pub fn allows(&self, channel_id: u64, author_roles: &[u64]) -> bool {
        self.channel_allowed(channel_id) && self.roles_allowed(author_roles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_lists_allow_everything() {
        let policy = AccessPolicy::default();
        assert!(policy.allows(1, &[]));
        assert!(policy.allows(2, &[99]));
    }

    #[test]
    fn channel_list_restricts_channels() {
        let policy = AccessPolicy::new(HashSet::from([10, 11]), HashSet::new());
        assert!(policy.allows(10, &[]));
        assert!(!policy.allows(12, &[]));
    }

    #[test]
    fn role_list_needs_any_matching_role() {
        let policy = AccessPolicy::new(HashSet::new(), HashSet::from([5]));
        assert!(policy.allows(1, &[3, 5]));
        assert!(!policy.allows(1, &[3, 4]));
        assert!(!policy.allows(1, &[]));
    }

    #[test]
    fn both_lists_must_pass() {
        let policy = AccessPolicy::new(HashSet::from([10]), HashSet::from([5]));
        assert!(policy.allows(10, &[5]));
        assert!(!policy.allows(11, &[5]));
        assert!(!policy.allows(10, &[6]));
    }
}
