//! Token lists: decentralized shared state across multiple tasks.
//!
//! A [`TokenList`] tracks its elements through weak references, so a
//! [`Token`] is logically removed from every list that holds it as soon as
//! the last strong reference to it is dropped. Idiomatically a token is held
//! like a scope guard: a task takes a token, keeps it alive across
//! suspensions, and the token removes itself when the task's frame is
//! destroyed.
//!
//! Tokens can carry a payload, and the list offers aggregation queries over
//! the payloads of the currently-live tokens:
//!
//! ```
//! use cotask::token::TokenList;
//!
//! let list: TokenList<f32> = TokenList::new();
//! let slow = list.take_token("slow-poison", 1.5);
//! let fast = list.take_token("fast-poison", 4.0);
//! assert_eq!(list.max(), Some(4.0));
//! drop(fast);
//! assert_eq!(list.max(), Some(1.5));
//! drop(slow);
//! assert!(!list.has_tokens());
//! ```

use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Handle to a [`TokenList`] element carrying a debug name and a payload.
///
/// Tokens are compared by identity, never by payload: two tokens with equal
/// payloads remain two distinct list entries.
#[derive(Debug)]
pub struct Token<T> {
    name: String,
    data: T,
}

impl<T> Token<T> {
    /// Returns the token's debug name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns a reference to the token's payload.
    #[must_use]
    pub fn data(&self) -> &T {
        &self.data
    }
}

/// Creates a free-standing payload-less token.
#[must_use]
pub fn make_token(name: impl Into<String>) -> Rc<Token<()>> {
    Rc::new(Token {
        name: name.into(),
        data: (),
    })
}

/// Ordered container of weakly-referenced [`Token`]s.
///
/// Expired entries are compacted opportunistically by the query methods.
#[derive(Debug, Default)]
pub struct TokenList<T = ()> {
    // Interior mutability lets read-only queries drop expired entries.
    tokens: RefCell<Vec<Weak<Token<T>>>>,
}

impl<T> TokenList<T> {
    /// Creates an empty token list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tokens: RefCell::new(Vec::new()),
        }
    }

    /// Creates a free-standing token with the given debug name and payload.
    #[must_use]
    pub fn make_token(name: impl Into<String>, data: T) -> Rc<Token<T>> {
        Rc::new(Token {
            name: name.into(),
            data,
        })
    }

    /// Creates a token and adds it to this list.
    ///
    /// The returned strong reference is the token's lifetime: dropping it
    /// removes the token from the list.
    #[must_use = "dropping the returned token immediately removes it from the list"]
    pub fn take_token(&self, name: impl Into<String>, data: T) -> Rc<Token<T>> {
        let token = Self::make_token(name, data);
        self.sanitize();
        self.tokens.borrow_mut().push(Rc::downgrade(&token));
        token
    }

    /// Adds an existing token to this list.
    ///
    /// Adding the same token (by identity) twice is a no-op; equal payloads
    /// on distinct tokens are never collapsed.
    pub fn add_token(&self, token: &Rc<Token<T>>) {
        let already_present = self
            .tokens
            .borrow()
            .iter()
            .any(|held| held.as_ptr() == Rc::as_ptr(token));
        if !already_present {
            self.sanitize();
            self.tokens.borrow_mut().push(Rc::downgrade(token));
        }
    }

    /// Explicitly removes a token from this list.
    ///
    /// Usually unnecessary: dropping the last strong reference removes the
    /// token from every list that held it.
    pub fn remove_token(&self, token: &Rc<Token<T>>) {
        self.tokens
            .borrow_mut()
            .retain(|held| held.as_ptr() != Rc::as_ptr(token));
    }

    /// Returns whether this list holds any live tokens.
    #[must_use]
    pub fn has_tokens(&self) -> bool {
        let mut tokens = self.tokens.borrow_mut();
        // Expired tokens at the back can be dropped without disturbing order.
        while let Some(last) = tokens.last() {
            if last.strong_count() > 0 {
                return true;
            }
            tokens.pop();
        }
        false
    }

    /// Returns the payloads of all live tokens, oldest first.
    #[must_use]
    pub fn token_data(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.tokens
            .borrow()
            .iter()
            .filter_map(|t| t.upgrade())
            .map(|t| t.data.clone())
            .collect()
    }

    /// Returns the payload of the least-recently-added live token.
    #[must_use]
    pub fn least_recent(&self) -> Option<T>
    where
        T: Clone,
    {
        self.sanitize();
        let tokens = self.tokens.borrow();
        tokens.first().and_then(Weak::upgrade).map(|t| t.data.clone())
    }

    /// Returns the payload of the most-recently-added live token.
    #[must_use]
    pub fn most_recent(&self) -> Option<T>
    where
        T: Clone,
    {
        self.sanitize();
        let tokens = self.tokens.borrow();
        tokens.last().and_then(Weak::upgrade).map(|t| t.data.clone())
    }

    /// Returns the smallest payload among the live tokens.
    #[must_use]
    pub fn min(&self) -> Option<T>
    where
        T: Clone + PartialOrd,
    {
        let mut result: Option<T> = None;
        self.for_each_live(|data| {
            if result.as_ref().is_none_or(|best| data < best) {
                result = Some(data.clone());
            }
        });
        result
    }

    /// Returns the largest payload among the live tokens.
    #[must_use]
    pub fn max(&self) -> Option<T>
    where
        T: Clone + PartialOrd,
    {
        let mut result: Option<T> = None;
        self.for_each_live(|data| {
            if result.as_ref().is_none_or(|best| data > best) {
                result = Some(data.clone());
            }
        });
        result
    }

    /// Returns the arithmetic mean of all live payloads.
    #[must_use]
    pub fn mean(&self) -> Option<f64>
    where
        T: Clone + Into<f64>,
    {
        let mut total = 0.0;
        let mut count = 0usize;
        self.for_each_live(|data| {
            total += data.clone().into();
            count += 1;
        });
        (count > 0).then(|| total / count as f64)
    }

    /// Returns whether any live token carries a payload equal to `needle`.
    #[must_use]
    pub fn contains(&self, needle: &T) -> bool
    where
        T: PartialEq,
    {
        let mut found = false;
        self.for_each_live(|data| {
            if data == needle {
                found = true;
            }
        });
        found
    }

    /// Returns a newline-separated list of the debug names of all live
    /// tokens, or `"[no tokens]"`.
    #[must_use]
    pub fn debug_string(&self) -> String {
        let names: Vec<String> = self
            .tokens
            .borrow()
            .iter()
            .filter_map(|t| t.upgrade())
            .map(|t| t.name.clone())
            .collect();
        if names.is_empty() {
            "[no tokens]".to_string()
        } else {
            names.join("\n")
        }
    }

    // Drops all expired entries, preserving the order of the survivors.
    fn sanitize(&self) {
        self.tokens
            .borrow_mut()
            .retain(|t| t.strong_count() > 0);
    }

    // Visits each live payload while compacting expired entries.
    fn for_each_live(&self, mut visit: impl FnMut(&T)) {
        self.tokens.borrow_mut().retain(|held| match held.upgrade() {
            Some(token) => {
                visit(&token.data);
                true
            }
            None => false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_has_no_tokens() {
        let list: TokenList<f32> = TokenList::new();
        assert!(!list.has_tokens());
        assert_eq!(list.min(), None);
        assert_eq!(list.max(), None);
        assert_eq!(list.mean(), None);
        assert_eq!(list.most_recent(), None);
        assert_eq!(list.least_recent(), None);
    }

    #[test]
    fn aggregation_over_live_tokens() {
        let list: TokenList<f32> = TokenList::new();
        let a = list.take_token("a", 0.5);
        let _b = list.take_token("b", 1.2);
        let _c = list.take_token("c", 0.8);
        drop(a);

        assert!(list.has_tokens());
        assert_eq!(list.max(), Some(1.2));
        assert_eq!(list.min(), Some(0.8));
        let mean = list.mean().expect("live tokens present");
        assert!((mean - 1.0).abs() < 1e-6, "mean was {mean}");
        assert_eq!(list.most_recent(), Some(0.8));
        assert_eq!(list.least_recent(), Some(1.2));
    }

    #[test]
    fn all_tokens_dropped() {
        let list: TokenList<f32> = TokenList::new();
        let a = list.take_token("a", 1.0);
        let b = list.take_token("b", 2.0);
        drop(a);
        drop(b);
        assert!(!list.has_tokens());
        assert!(list.token_data().is_empty());
    }

    #[test]
    fn contains_matches_payload() {
        let list: TokenList<u32> = TokenList::new();
        let _a = list.take_token("a", 7);
        assert!(list.contains(&7));
        assert!(!list.contains(&8));
    }

    #[test]
    fn equal_payloads_are_distinct_tokens() {
        let list: TokenList<u32> = TokenList::new();
        let _a = list.take_token("a", 3);
        let _b = list.take_token("b", 3);
        assert_eq!(list.token_data(), vec![3, 3]);
    }

    #[test]
    fn add_token_deduplicates_by_identity() {
        let list: TokenList<u32> = TokenList::new();
        let token = TokenList::make_token("t", 1);
        list.add_token(&token);
        list.add_token(&token);
        assert_eq!(list.token_data(), vec![1]);
    }

    #[test]
    fn remove_token_only_removes_that_token() {
        let list: TokenList<u32> = TokenList::new();
        let a = list.take_token("a", 1);
        let _b = list.take_token("b", 2);
        list.remove_token(&a);
        assert_eq!(list.token_data(), vec![2]);
    }

    #[test]
    fn debug_string_lists_names() {
        let list: TokenList<()> = TokenList::new();
        assert_eq!(list.debug_string(), "[no tokens]");
        let _a = list.take_token("first", ());
        let _b = list.take_token("second", ());
        assert_eq!(list.debug_string(), "first\nsecond");
    }

    #[test]
    fn payload_less_token_helper() {
        let list: TokenList = TokenList::new();
        let token = make_token("plain");
        list.add_token(&token);
        assert!(list.has_tokens());
        assert_eq!(token.name(), "plain");
    }
}
