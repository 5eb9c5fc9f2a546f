//! Hierarchical role/authority checks
//!
//! A hierarchy maps a label to the labels it directly grants
//! (`ADMIN -> [MANAGER, USER]`). A user label satisfies a required label
//! when they are equal or the required label is reachable from it.
//!
//! Traversal uses a worklist with a visited set, so a cyclic graph cannot
//! hang a request; [`RbacConfig::validate`] still rejects cycles at load
//! time because they almost always indicate a configuration mistake.

use crate::context::AuthorizationContext;
use crate::error::{Error, Result};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use tracing::debug;

/// Label inheritance graph: label -> directly inherited labels
pub type Hierarchy = BTreeMap<String, Vec<String>>;

/// RBAC policy configuration; loaded once and read-only afterwards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RbacConfig {
    /// Empty requirement lists deny instead of allow
    pub default_deny_all: bool,
    /// Compare labels case-sensitively
    pub case_sensitive: bool,
    /// Role inheritance
    pub role_hierarchy: Hierarchy,
    /// Authority inheritance
    pub authority_hierarchy: Hierarchy,
}

impl Default for RbacConfig {
    fn default() -> Self {
        Self {
            default_deny_all: true,
            case_sensitive: true,
            role_hierarchy: Hierarchy::from([
                ("ADMIN".to_string(), labels(&["MANAGER", "USER"])),
                ("MANAGER".to_string(), labels(&["USER"])),
            ]),
            authority_hierarchy: Hierarchy::from([
                (
                    "ADMIN_ACCESS".to_string(),
                    labels(&["WRITE_ACCESS", "READ_ACCESS"]),
                ),
                ("WRITE_ACCESS".to_string(), labels(&["READ_ACCESS"])),
            ]),
        }
    }
}

fn labels(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

impl RbacConfig {
    /// Config with empty hierarchies and the given deny flag
    pub fn flat(default_deny_all: bool) -> Self {
        Self {
            default_deny_all,
            case_sensitive: true,
            role_hierarchy: Hierarchy::new(),
            authority_hierarchy: Hierarchy::new(),
        }
    }

    /// Reject cyclic hierarchies
    ///
    /// # Errors
    ///
    /// `Config` naming the first cycle found, e.g. `A -> B -> A`.
    pub fn validate(&self) -> Result<()> {
        for (name, hierarchy) in [
            ("role", &self.role_hierarchy),
            ("authority", &self.authority_hierarchy),
        ] {
            if let Some(cycle) = find_cycle(hierarchy) {
                return Err(Error::Config(format!(
                    "{name} hierarchy contains a cycle: {}",
                    cycle.join(" -> ")
                )));
            }
        }
        Ok(())
    }
}

/// Depth-first search for a cycle, returned as the closed path
fn find_cycle(hierarchy: &Hierarchy) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        InProgress,
        Done,
    }

    let mut marks: HashMap<&str, Mark> = HashMap::new();

    for root in hierarchy.keys() {
        if marks.contains_key(root.as_str()) {
            continue;
        }

        // (node, index of the next child to visit)
        let mut stack: Vec<(&str, usize)> = vec![(root.as_str(), 0)];
        marks.insert(root.as_str(), Mark::InProgress);

        while let Some((node, next)) = stack.last_mut() {
            let children = hierarchy.get(*node).map(Vec::as_slice).unwrap_or_default();
            let Some(child) = children.get(*next) else {
                marks.insert(*node, Mark::Done);
                stack.pop();
                continue;
            };
            *next += 1;

            match marks.get(child.as_str()) {
                Some(Mark::InProgress) => {
                    let start = stack
                        .iter()
                        .position(|(n, _)| *n == child.as_str())
                        .unwrap_or(0);
                    let mut cycle: Vec<String> =
                        stack[start..].iter().map(|(n, _)| (*n).to_string()).collect();
                    cycle.push(child.clone());
                    return Some(cycle);
                }
                Some(Mark::Done) => {}
                None => {
                    marks.insert(child.as_str(), Mark::InProgress);
                    stack.push((child.as_str(), 0));
                }
            }
        }
    }

    None
}

/// Why an RBAC guard refused access
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessDenied {
    /// No accepted credentials
    #[error("authentication required")]
    Unauthenticated,

    /// Authenticated, but lacking the required grants
    #[error("insufficient privileges: requires {}", .required.join(", "))]
    InsufficientPrivileges {
        /// Labels that would have granted access
        required: Vec<String>,
    },
}

impl AccessDenied {
    /// 401 for `Unauthenticated`, 403 for `InsufficientPrivileges`
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::InsufficientPrivileges { .. } => StatusCode::FORBIDDEN,
        }
    }
}

/// Evaluates RBAC policies against an [`AuthorizationContext`]
///
/// # Example
///
/// ```rust
/// use keyward::context::AuthorizationContext;
/// use keyward::rbac::{RbacConfig, RbacEngine};
///
/// let engine = RbacEngine::new(RbacConfig::default());
/// let admin = AuthorizationContext::builder().subject("1").role("ADMIN").build();
///
/// assert!(engine.has_all_roles(&admin, &["MANAGER", "USER"]));
/// assert!(engine.require_role(&admin, "USER").is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct RbacEngine {
    default_deny_all: bool,
    case_sensitive: bool,
    roles: HashMap<String, Vec<String>>,
    authorities: HashMap<String, Vec<String>>,
}

impl Default for RbacEngine {
    fn default() -> Self {
        Self::new(RbacConfig::default())
    }
}

impl RbacEngine {
    /// Engine over `config`; cyclic graphs are tolerated
    pub fn new(config: RbacConfig) -> Self {
        let case_sensitive = config.case_sensitive;
        let normalize_graph = |hierarchy: Hierarchy| -> HashMap<String, Vec<String>> {
            let mut graph: HashMap<String, Vec<String>> = HashMap::new();
            for (label, inherited) in hierarchy {
                let entry = graph.entry(normalize(&label, case_sensitive).into_owned()).or_default();
                entry.extend(
                    inherited
                        .iter()
                        .map(|l| normalize(l, case_sensitive).into_owned()),
                );
            }
            graph
        };

        Self {
            default_deny_all: config.default_deny_all,
            case_sensitive,
            roles: normalize_graph(config.role_hierarchy),
            authorities: normalize_graph(config.authority_hierarchy),
        }
    }

    /// Engine over `config`, rejecting cyclic graphs
    ///
    /// # Errors
    ///
    /// As [`RbacConfig::validate`].
    pub fn try_new(config: RbacConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config))
    }

    /// Whether empty requirement lists deny
    pub fn default_deny_all(&self) -> bool {
        self.default_deny_all
    }

    /// `user_role` is `required` or grants it through the role hierarchy
    pub fn role_matches(&self, user_role: &str, required: &str) -> bool {
        self.matches(&self.roles, user_role, required)
    }

    /// `user_authority` is `required` or grants it through the authority hierarchy
    pub fn authority_matches(&self, user_authority: &str, required: &str) -> bool {
        self.matches(&self.authorities, user_authority, required)
    }

    fn matches(&self, graph: &HashMap<String, Vec<String>>, user: &str, required: &str) -> bool {
        let user = self.normalize(user);
        let required = self.normalize(required);
        if user == required {
            return true;
        }

        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        if let Some(inherited) = graph.get(user.as_ref()) {
            queue.extend(inherited.iter().map(String::as_str));
        }

        while let Some(label) = queue.pop_front() {
            if label == required.as_ref() {
                return true;
            }
            if !visited.insert(label) {
                continue;
            }
            if let Some(inherited) = graph.get(label) {
                queue.extend(inherited.iter().map(String::as_str));
            }
        }

        false
    }

    fn normalize<'a>(&self, label: &'a str) -> Cow<'a, str> {
        normalize(label, self.case_sensitive)
    }

    fn any_satisfied(
        &self,
        graph: &HashMap<String, Vec<String>>,
        held: &[String],
        required: &[&str],
    ) -> bool {
        required
            .iter()
            .any(|req| held.iter().any(|label| self.matches(graph, label, req)))
    }

    fn all_satisfied(
        &self,
        graph: &HashMap<String, Vec<String>>,
        held: &[String],
        required: &[&str],
    ) -> bool {
        required
            .iter()
            .all(|req| held.iter().any(|label| self.matches(graph, label, req)))
    }

    /// Some held role satisfies some required role
    pub fn has_any_role(&self, context: &AuthorizationContext, required: &[&str]) -> bool {
        if !context.authenticated {
            return false;
        }
        if required.is_empty() {
            return !self.default_deny_all;
        }
        self.any_satisfied(&self.roles, &context.roles, required)
    }

    /// Every required role is satisfied by some held role
    pub fn has_all_roles(&self, context: &AuthorizationContext, required: &[&str]) -> bool {
        if !context.authenticated {
            return false;
        }
        if required.is_empty() {
            return !self.default_deny_all;
        }
        self.all_satisfied(&self.roles, &context.roles, required)
    }

    /// Some held authority satisfies some required authority
    pub fn has_any_authority(&self, context: &AuthorizationContext, required: &[&str]) -> bool {
        if !context.authenticated {
            return false;
        }
        if required.is_empty() {
            return !self.default_deny_all;
        }
        self.any_satisfied(&self.authorities, &context.authorities, required)
    }

    /// Every required authority is satisfied by some held authority
    pub fn has_all_authorities(&self, context: &AuthorizationContext, required: &[&str]) -> bool {
        if !context.authenticated {
            return false;
        }
        if required.is_empty() {
            return !self.default_deny_all;
        }
        self.all_satisfied(&self.authorities, &context.authorities, required)
    }

    /// Any of `roles` OR any of `authorities`; an empty list counts as satisfied
    pub fn require_role_or_authority(
        &self,
        context: &AuthorizationContext,
        roles: &[&str],
        authorities: &[&str],
    ) -> bool {
        if !context.authenticated {
            return false;
        }
        let roles_ok = roles.is_empty() || self.any_satisfied(&self.roles, &context.roles, roles);
        let authorities_ok = authorities.is_empty()
            || self.any_satisfied(&self.authorities, &context.authorities, authorities);
        roles_ok || authorities_ok
    }

    /// The subject owns the resource, or holds one of `roles`
    ///
    /// An empty `roles` list means owner only, whatever `default_deny_all` says.
    pub fn require_ownership_or_role(
        &self,
        context: &AuthorizationContext,
        owner_id: &str,
        roles: &[&str],
    ) -> bool {
        if !context.authenticated {
            return false;
        }
        if !context.subject.is_empty() && context.subject == owner_id {
            return true;
        }
        !roles.is_empty() && self.any_satisfied(&self.roles, &context.roles, roles)
    }

    /// `roles` plus everything they inherit
    pub fn effective_roles<S: AsRef<str>>(&self, roles: &[S]) -> BTreeSet<String> {
        self.closure(&self.roles, roles)
    }

    /// `authorities` plus everything they inherit
    pub fn effective_authorities<S: AsRef<str>>(&self, authorities: &[S]) -> BTreeSet<String> {
        self.closure(&self.authorities, authorities)
    }

    fn closure<S: AsRef<str>>(
        &self,
        graph: &HashMap<String, Vec<String>>,
        labels: &[S],
    ) -> BTreeSet<String> {
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<String> = labels
            .iter()
            .map(|l| self.normalize(l.as_ref()).into_owned())
            .collect();

        while let Some(label) = queue.pop_front() {
            if seen.contains(&label) {
                continue;
            }
            if let Some(inherited) = graph.get(&label) {
                queue.extend(inherited.iter().filter(|l| !seen.contains(*l)).cloned());
            }
            seen.insert(label);
        }

        seen
    }

    /// Guard form of a single-role check
    ///
    /// # Errors
    ///
    /// [`AccessDenied`] distinguishing 401 from 403.
    pub fn require_role(
        &self,
        context: &AuthorizationContext,
        role: &str,
    ) -> std::result::Result<(), AccessDenied> {
        self.require_any_role(context, &[role])
    }

    /// Guard form of [`RbacEngine::has_any_role`]
    ///
    /// # Errors
    ///
    /// [`AccessDenied`] distinguishing 401 from 403.
    pub fn require_any_role(
        &self,
        context: &AuthorizationContext,
        roles: &[&str],
    ) -> std::result::Result<(), AccessDenied> {
        guard(context, roles, self.has_any_role(context, roles))
    }

    /// Guard form of [`RbacEngine::has_all_roles`]
    ///
    /// # Errors
    ///
    /// [`AccessDenied`] distinguishing 401 from 403.
    pub fn require_all_roles(
        &self,
        context: &AuthorizationContext,
        roles: &[&str],
    ) -> std::result::Result<(), AccessDenied> {
        guard(context, roles, self.has_all_roles(context, roles))
    }

    /// Guard form of a single-authority check
    ///
    /// # Errors
    ///
    /// [`AccessDenied`] distinguishing 401 from 403.
    pub fn require_authority(
        &self,
        context: &AuthorizationContext,
        authority: &str,
    ) -> std::result::Result<(), AccessDenied> {
        self.require_any_authority(context, &[authority])
    }

    /// Guard form of [`RbacEngine::has_any_authority`]
    ///
    /// # Errors
    ///
    /// [`AccessDenied`] distinguishing 401 from 403.
    pub fn require_any_authority(
        &self,
        context: &AuthorizationContext,
        authorities: &[&str],
    ) -> std::result::Result<(), AccessDenied> {
        guard(
            context,
            authorities,
            self.has_any_authority(context, authorities),
        )
    }
}

fn normalize(label: &str, case_sensitive: bool) -> Cow<'_, str> {
    if case_sensitive {
        Cow::Borrowed(label)
    } else {
        Cow::Owned(label.to_lowercase())
    }
}

fn guard(
    context: &AuthorizationContext,
    required: &[&str],
    allowed: bool,
) -> std::result::Result<(), AccessDenied> {
    if allowed {
        return Ok(());
    }
    if !context.authenticated {
        return Err(AccessDenied::Unauthenticated);
    }
    debug!(subject = %context.subject, ?required, "Access denied");
    Err(AccessDenied::InsufficientPrivileges {
        required: required.iter().map(|s| (*s).to_string()).collect(),
    })
}
