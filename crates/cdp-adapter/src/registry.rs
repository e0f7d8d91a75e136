//! Adapter registry keeping track of pages, their targets and every cdp session bound to them.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::ids::PageId;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TargetContext {
    pub target_id: String,
    /// Session that page-scoped commands are sent on.
    pub cdp_session: Option<String>,
    pub recent_url: Option<String>,
}

/// How a cdp session relates to the page it is mapped to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionRole {
    Primary,
    /// Extra debugging session opened on the page target.
    Auxiliary,
    /// Auto-attached out-of-process frame below one of the page's sessions.
    Child,
}

/// Concurrent registry for pages and sessions.
#[derive(Default)]
pub struct Registry {
    pages: DashMap<PageId, TargetContext>,
    targets: DashMap<String, PageId>,
    sessions: DashMap<String, (PageId, SessionRole)>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a page target, returning the existing page if the target is already known.
    pub fn insert_target(&self, target_id: &str, url: Option<String>) -> PageId {
        if let Some(existing) = self.targets.get(target_id) {
            return *existing.value();
        }
        let page = PageId::new();
        self.targets.insert(target_id.to_string(), page);
        self.pages.insert(
            page,
            TargetContext {
                target_id: target_id.to_string(),
                cdp_session: None,
                recent_url: url.filter(|u| !u.is_empty()),
            },
        );
        page
    }

    pub fn remove_target(&self, target_id: &str) -> Option<PageId> {
        let (_, page) = self.targets.remove(target_id)?;
        self.pages.remove(&page);
        self.sessions.retain(|_, (owner, _)| *owner != page);
        Some(page)
    }

    pub fn page_for_target(&self, target_id: &str) -> Option<PageId> {
        self.targets.get(target_id).map(|entry| *entry.value())
    }

    /// Maps `session` to `page`. A primary binding only takes effect while the page has none.
    pub fn bind_session(&self, page: PageId, session: String, role: SessionRole) -> SessionRole {
        let role = match role {
            SessionRole::Primary => match self.pages.get_mut(&page) {
                Some(mut ctx) if ctx.cdp_session.is_none() => {
                    ctx.cdp_session = Some(session.clone());
                    SessionRole::Primary
                }
                _ => SessionRole::Auxiliary,
            },
            other => other,
        };
        self.sessions.insert(session, (page, role));
        role
    }

    pub fn unbind_session(&self, session: &str) -> Option<PageId> {
        let (_, (page, role)) = self.sessions.remove(session)?;
        if role == SessionRole::Primary {
            if let Some(mut ctx) = self.pages.get_mut(&page) {
                ctx.cdp_session = None;
            }
        }
        Some(page)
    }

    pub fn page_for_session(&self, session: &str) -> Option<PageId> {
        self.sessions.get(session).map(|entry| entry.value().0)
    }

    pub fn get(&self, page: &PageId) -> Option<TargetContext> {
        self.pages.get(page).map(|entry| entry.value().clone())
    }

    pub fn iter(&self) -> Vec<(PageId, TargetContext)> {
        self.pages
            .iter()
            .map(|kv| (*kv.key(), kv.value().clone()))
            .collect()
    }

    pub fn set_recent_url(&self, page: &PageId, url: String) {
        if let Some(mut entry) = self.pages.get_mut(page) {
            entry.recent_url = Some(url);
        }
    }

    pub fn get_cdp_session(&self, page: &PageId) -> Option<String> {
        self.pages
            .get(page)
            .and_then(|entry| entry.cdp_session.clone())
    }

    pub fn clear(&self) {
        self.pages.clear();
        self.targets.clear();
        self.sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_session_becomes_primary() {
        let registry = Registry::new();
        let page = registry.insert_target("T1", Some("about:blank".into()));

        let role = registry.bind_session(page, "S1".into(), SessionRole::Primary);
        assert_eq!(role, SessionRole::Primary);
        let role = registry.bind_session(page, "S2".into(), SessionRole::Primary);
        assert_eq!(role, SessionRole::Auxiliary);

        assert_eq!(registry.get_cdp_session(&page).as_deref(), Some("S1"));
        assert_eq!(registry.page_for_session("S2"), Some(page));
    }

    #[test]
    fn child_sessions_resolve_to_owning_page() {
        let registry = Registry::new();
        let page = registry.insert_target("T1", None);
        registry.bind_session(page, "S1".into(), SessionRole::Primary);
        registry.bind_session(page, "OOPIF".into(), SessionRole::Child);

        assert_eq!(registry.page_for_session("OOPIF"), Some(page));
        assert_eq!(registry.unbind_session("OOPIF"), Some(page));
        assert_eq!(registry.page_for_session("OOPIF"), None);
        assert_eq!(registry.get_cdp_session(&page).as_deref(), Some("S1"));
    }

    #[test]
    fn removing_target_drops_its_sessions() {
        let registry = Registry::new();
        let page = registry.insert_target("T1", None);
        assert_eq!(registry.insert_target("T1", None), page);
        registry.bind_session(page, "S1".into(), SessionRole::Primary);

        assert_eq!(registry.remove_target("T1"), Some(page));
        assert!(registry.get(&page).is_none());
        assert!(registry.page_for_session("S1").is_none());
        assert!(registry.remove_target("T1").is_none());
    }
}
