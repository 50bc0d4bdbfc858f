// Page titles in the namespaces a rename can touch.
use super::{AccountName, Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum PageNamespace {
    Main,
    User,
    UserTalk,
}

impl PageNamespace {
    pub fn prefix(&self) -> &'static str {
        match self {
            PageNamespace::Main => "",
            PageNamespace::User => "User:",
            PageNamespace::UserTalk => "User talk:",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawPageTitle")]
pub struct PageTitle {
    pub namespace: PageNamespace,
    pub text: String,
}

// Wire shape of a title before it is checked.
#[derive(Deserialize)]
struct RawPageTitle {
    namespace: PageNamespace,
    text: String,
}

impl TryFrom<RawPageTitle> for PageTitle {
    type Error = Error;

    fn try_from(raw: RawPageTitle) -> Result<Self> {
        PageTitle::new(raw.namespace, raw.text)
    }
}

impl PageTitle {
    pub fn new(namespace: PageNamespace, text: impl Into<String>) -> Result<Self> {
        let text = text.into().replace('_', " ");
        if text.trim().is_empty() || text.contains(['#', '<', '>', '[', ']', '|', '{', '}']) {
            return Err(Error::InvalidTitle(text));
        }
        Ok(Self { namespace, text })
    }

    /// Whether this title is the account's root page or one of its subpages.
    pub fn belongs_to(&self, name: &AccountName) -> bool {
        let root = name.as_str();
        self.text == root
            || self
                .text
                .strip_prefix(root)
                .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Replace the leading account-name component, keeping namespace and subpage path.
    ///
    /// ```
    /// use concord_common::{AccountName, PageNamespace, PageTitle};
    ///
    /// let old = AccountName::parse("Alice").unwrap();
    /// let new = AccountName::parse("Bob").unwrap();
    /// let page = PageTitle::new(PageNamespace::User, "Alice/drafts").unwrap();
    /// assert_eq!(page.renamed(&old, &new).unwrap().text, "Bob/drafts");
    /// ```
    pub fn renamed(&self, old: &AccountName, new: &AccountName) -> Option<PageTitle> {
        if !self.belongs_to(old) {
            return None;
        }
        let rest = &self.text[old.as_str().len()..];
        Some(PageTitle {
            namespace: self.namespace,
            text: format!("{}{}", new.as_str(), rest),
        })
    }
}

impl fmt::Display for PageTitle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.namespace.prefix(), self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(value: &str) -> AccountName {
        AccountName::parse(value).expect("name")
    }

    #[test]
    fn prefix_match_requires_a_subpage_boundary() {
        let alice = name("Alice");
        assert!(PageTitle::new(PageNamespace::User, "Alice").unwrap().belongs_to(&alice));
        assert!(PageTitle::new(PageNamespace::User, "Alice/a/b").unwrap().belongs_to(&alice));
        assert!(!PageTitle::new(PageNamespace::User, "Alicex").unwrap().belongs_to(&alice));
        assert!(!PageTitle::new(PageNamespace::User, "Ali").unwrap().belongs_to(&alice));
    }

    #[test]
    fn renamed_keeps_namespace_and_subpath() {
        let page = PageTitle::new(PageNamespace::UserTalk, "Alice/Archive 1").unwrap();
        let moved = page.renamed(&name("Alice"), &name("Bob")).expect("moved");
        assert_eq!(moved.namespace, PageNamespace::UserTalk);
        assert_eq!(moved.to_string(), "User talk:Bob/Archive 1");
        assert!(page.renamed(&name("Carol"), &name("Bob")).is_none());
    }

    #[test]
    fn decoding_applies_title_checks() {
        let page: PageTitle =
            serde_json::from_str(r#"{"namespace":"User","text":"Alice_drafts"}"#).expect("decode");
        assert_eq!(page.text, "Alice drafts");
        assert!(serde_json::from_str::<PageTitle>(r#"{"namespace":"User","text":"A|b"}"#).is_err());
        assert!(serde_json::from_str::<PageTitle>(r#"{"namespace":"User","text":"  "}"#).is_err());
    }
}
