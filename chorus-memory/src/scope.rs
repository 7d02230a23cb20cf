//! Memory scopes.
//!
//! Items live in one of three scopes: per-(room, persona), per-persona across
//! rooms, or per-(room, persona, user). Which scopes exist is a policy
//! decision; the user scope additionally needs the runtime toggle. Reads
//! consult the room-scoped namespace plus the persona-global one when policy
//! allows it.

use crate::policy::MemoryPolicy;
use crate::store::namespace_for;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryScope {
    #[default]
    PersonaRoom,
    Persona,
    PersonaUser,
}

impl MemoryScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PersonaRoom => "persona_room",
            Self::Persona => "persona",
            Self::PersonaUser => "persona_user",
        }
    }

    /// Namespace string for this scope. `user_id` only matters for
    /// `PersonaUser`.
    pub fn namespace(&self, room_id: &str, persona_id: &str, user_id: Option<&str>) -> String {
        match self {
            Self::PersonaRoom => namespace_for(room_id, persona_id),
            Self::Persona => format!("agent:{persona_id}"),
            Self::PersonaUser => format!(
                "{}|user:{}",
                namespace_for(room_id, persona_id),
                user_id.unwrap_or("unknown")
            ),
        }
    }
}

/// Pick the scope a new item is written under.
///
/// Order matches the policy gates: a user-addressed write lands in the user
/// scope when both the policy and the runtime toggle allow it; otherwise the
/// room scope, falling back to the room-independent persona scope when the
/// policy excludes `persona_room`.
pub fn write_scope(
    policy: &MemoryPolicy,
    scope_user_enabled: bool,
    room_id: &str,
    persona_id: &str,
    user_id: Option<&str>,
) -> (MemoryScope, String) {
    let user = user_id.filter(|u| !u.is_empty());
    let scope = if scope_user_enabled
        && user.is_some()
        && policy.allows_scope(MemoryScope::PersonaUser)
    {
        MemoryScope::PersonaUser
    } else if !policy.allows_scope(MemoryScope::PersonaRoom)
        && policy.allows_scope(MemoryScope::Persona)
    {
        MemoryScope::Persona
    } else {
        MemoryScope::PersonaRoom
    };
    (scope, scope.namespace(room_id, persona_id, user))
}

/// Namespaces consulted on reads: the room-scoped key first, then the
/// persona-global key when the policy carries that scope.
pub fn read_namespaces(policy: &MemoryPolicy, room_id: &str, persona_id: &str) -> Vec<String> {
    let (_, room_key) = write_scope(policy, false, room_id, persona_id, None);
    let mut namespaces = vec![room_key];
    if policy.allows_scope(MemoryScope::Persona) {
        let persona_key = MemoryScope::Persona.namespace(room_id, persona_id, None);
        if !namespaces.contains(&persona_key) {
            namespaces.push(persona_key);
        }
    }
    namespaces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_shapes() {
        assert_eq!(
            MemoryScope::PersonaRoom.namespace("room:demo", "clip_goblin", None),
            "room:room:demo|agent:clip_goblin"
        );
        assert_eq!(
            MemoryScope::Persona.namespace("room:demo", "clip_goblin", None),
            "agent:clip_goblin"
        );
        assert_eq!(
            MemoryScope::PersonaUser.namespace("room:demo", "clip_goblin", Some("viewer_1")),
            "room:room:demo|agent:clip_goblin|user:viewer_1"
        );
    }

    #[test]
    fn test_write_scope_defaults_to_persona_room() {
        let policy = MemoryPolicy::default();
        let (scope, ns) = write_scope(&policy, false, "room:demo", "clip_goblin", Some("viewer"));
        assert_eq!(scope, MemoryScope::PersonaRoom);
        assert_eq!(ns, "room:room:demo|agent:clip_goblin");
    }

    #[test]
    fn test_write_scope_user_needs_toggle_policy_and_user() {
        let policy = MemoryPolicy::default();
        let (scope, ns) = write_scope(&policy, true, "room:demo", "clip_goblin", Some("viewer"));
        assert_eq!(scope, MemoryScope::PersonaUser);
        assert_eq!(ns, "room:room:demo|agent:clip_goblin|user:viewer");

        // No user id: falls back to the room scope even with the toggle on.
        let (scope, _) = write_scope(&policy, true, "room:demo", "clip_goblin", None);
        assert_eq!(scope, MemoryScope::PersonaRoom);

        // Policy without the user scope wins over the toggle.
        let narrow = MemoryPolicy {
            scopes: vec!["persona_room".to_string()],
            ..Default::default()
        };
        let (scope, _) = write_scope(&narrow, true, "room:demo", "clip_goblin", Some("viewer"));
        assert_eq!(scope, MemoryScope::PersonaRoom);
    }

    #[test]
    fn test_write_scope_falls_back_to_persona() {
        let policy = MemoryPolicy {
            scopes: vec!["persona".to_string()],
            ..Default::default()
        };
        let (scope, ns) = write_scope(&policy, false, "room:demo", "clip_goblin", None);
        assert_eq!(scope, MemoryScope::Persona);
        assert_eq!(ns, "agent:clip_goblin");
    }

    #[test]
    fn test_read_namespaces_dual_scope() {
        let policy = MemoryPolicy::default();
        let namespaces = read_namespaces(&policy, "room:demo", "clip_goblin");
        assert_eq!(
            namespaces,
            vec![
                "room:room:demo|agent:clip_goblin".to_string(),
                "agent:clip_goblin".to_string(),
            ]
        );

        let room_only = MemoryPolicy {
            scopes: vec!["persona_room".to_string()],
            ..Default::default()
        };
        assert_eq!(
            read_namespaces(&room_only, "room:demo", "clip_goblin"),
            vec!["room:room:demo|agent:clip_goblin".to_string()]
        );

        // Persona-only policy must not list the same key twice.
        let persona_only = MemoryPolicy {
            scopes: vec!["persona".to_string()],
            ..Default::default()
        };
        assert_eq!(
            read_namespaces(&persona_only, "room:demo", "clip_goblin"),
            vec!["agent:clip_goblin".to_string()]
        );
    }
}
