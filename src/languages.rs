/*!
 * Active-language context.
 *
 * A `LanguageContext` holds the configured language set and a stack of
 * locked languages. The active language is the top of the stack, or the
 * configured default when nothing is locked. Every `lock` must be paired
 * with a `release`; `LanguageContext::scoped` returns a guard that releases
 * on drop, which covers early returns and `?` paths.
 *
 * One context belongs to one unit of work. Request layers call `fork` on a
 * shared, configured context to get a fresh stack for each request, so a
 * language locked by one request is never visible to another.
 */

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{trace, warn};
use parking_lot::Mutex;

use crate::errors::{MultilingualError, Result};
use crate::language_utils::{field_suffix, get_language_name, normalize_code};

/// Immutable language configuration shared by all contexts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageSettings {
    /// Configured codes in their configured order
    codes: Vec<String>,
    /// Index of the default code in `codes`
    default_index: usize,
    /// Display names keyed by code
    names: BTreeMap<String, String>,
}

impl LanguageSettings {
    /// Validate and build the language configuration
    pub fn new(codes: &[&str], default: &str) -> Result<Self> {
        if codes.is_empty() {
            return Err(MultilingualError::Configuration(
                "At least one language code must be configured".to_string(),
            ));
        }

        let mut normalized: Vec<String> = Vec::with_capacity(codes.len());
        for code in codes {
            let code = normalize_code(code);
            if code.is_empty() {
                return Err(MultilingualError::Configuration(
                    "Language codes must not be empty".to_string(),
                ));
            }
            if normalized.contains(&code) {
                return Err(MultilingualError::Configuration(format!(
                    "Language code '{}' is configured twice",
                    code
                )));
            }
            normalized.push(code);
        }

        let default = normalize_code(default);
        let default_index = normalized.iter().position(|c| *c == default).ok_or_else(|| {
            MultilingualError::Configuration(format!(
                "Default language '{}' is not one of the configured codes",
                default
            ))
        })?;

        let names = normalized
            .iter()
            .map(|code| {
                let name = get_language_name(code).unwrap_or_else(|_| code.clone());
                (code.clone(), name)
            })
            .collect();

        Ok(Self {
            codes: normalized,
            default_index,
            names,
        })
    }

    /// Replace the display name of a configured language
    pub fn with_name(mut self, code: &str, name: &str) -> Result<Self> {
        let code = self.require(code)?;
        self.names.insert(code, name.to_string());
        Ok(self)
    }

    /// Configured codes in order
    pub fn codes(&self) -> &[String] {
        &self.codes
    }

    /// The configured default code
    pub fn default_code(&self) -> &str {
        &self.codes[self.default_index]
    }

    /// Display names keyed by code
    pub fn names(&self) -> &BTreeMap<String, String> {
        &self.names
    }

    /// Whether `code` is configured
    pub fn contains(&self, code: &str) -> bool {
        let code = normalize_code(code);
        self.codes.iter().any(|c| *c == code)
    }

    /// Normalize `code` and check that it is configured
    pub fn require(&self, code: &str) -> Result<String> {
        let normalized = normalize_code(code);
        if self.codes.contains(&normalized) {
            Ok(normalized)
        } else {
            Err(MultilingualError::UnknownLanguage(code.to_string()))
        }
    }

    /// Find the configured code whose field suffix equals `suffix`
    pub fn code_for_suffix(&self, suffix: &str) -> Option<&str> {
        self.codes
            .iter()
            .find(|code| field_suffix(code) == suffix)
            .map(String::as_str)
    }

    /// Requested language first, then the default, without duplicates
    pub fn fallback_chain(&self, code: &str) -> Result<Vec<String>> {
        let code = self.require(code)?;
        let default = self.default_code();

        if code == default {
            Ok(vec![code])
        } else {
            Ok(vec![code, default.to_string()])
        }
    }
}

/// Current-language state for one unit of work
#[derive(Debug)]
pub struct LanguageContext {
    settings: Arc<LanguageSettings>,
    /// Locked codes, innermost last
    stack: Mutex<Vec<String>>,
}

impl LanguageContext {
    /// Configure a context from a list of codes and a default
    pub fn configure(codes: &[&str], default: &str) -> Result<Self> {
        Ok(Self::new(Arc::new(LanguageSettings::new(codes, default)?)))
    }

    /// Create a context over already validated settings
    pub fn new(settings: Arc<LanguageSettings>) -> Self {
        Self {
            settings,
            stack: Mutex::new(Vec::new()),
        }
    }

    /// A fresh context with the same settings and an empty lock stack
    pub fn fork(&self) -> Self {
        Self::new(Arc::clone(&self.settings))
    }

    /// Shared language settings
    pub fn settings(&self) -> &LanguageSettings {
        &self.settings
    }

    /// Display names keyed by code
    pub fn names(&self) -> &BTreeMap<String, String> {
        self.settings.names()
    }

    /// The active language: the innermost lock, else the default
    pub fn get_active(&self) -> String {
        self.stack
            .lock()
            .last()
            .cloned()
            .unwrap_or_else(|| self.settings.default_code().to_string())
    }

    /// Make `code` active until the matching `release`
    pub fn lock(&self, code: &str) -> Result<()> {
        let code = self.settings.require(code)?;
        let mut stack = self.stack.lock();
        trace!("Locking language '{}' at depth {}", code, stack.len() + 1);
        stack.push(code);
        Ok(())
    }

    /// Restore the language that was active before the last `lock`
    pub fn release(&self) -> Result<()> {
        let mut stack = self.stack.lock();
        match stack.pop() {
            Some(code) => {
                trace!("Released language '{}', depth now {}", code, stack.len());
                Ok(())
            }
            None => Err(MultilingualError::State(
                "release() called without a matching lock()".to_string(),
            )),
        }
    }

    /// Number of outstanding locks
    pub fn lock_depth(&self) -> usize {
        self.stack.lock().len()
    }

    /// Lock `code` and release it when the returned guard drops
    pub fn scoped(&self, code: &str) -> Result<LanguageLock<'_>> {
        let code = self.settings.require(code)?;
        let mut stack = self.stack.lock();
        stack.push(code.clone());
        let depth = stack.len();
        trace!("Locking language '{}' at depth {} (scoped)", code, depth);
        Ok(LanguageLock {
            context: self,
            code,
            depth,
        })
    }

    /// Lock `code` for the duration of `f`, releasing on every exit path
    pub fn with_language<T>(&self, code: &str, f: impl FnOnce(&Self) -> T) -> Result<T> {
        let _guard = self.scoped(code)?;
        Ok(f(self))
    }

    /// Fallback chain for `code`
    pub fn get_fallback_chain(&self, code: &str) -> Result<Vec<String>> {
        self.settings.fallback_chain(code)
    }

    /// Fallback chain for the active language
    pub fn active_chain(&self) -> Vec<String> {
        let active = self.get_active();
        // The active code always comes from the configured set
        match self.settings.fallback_chain(&active) {
            Ok(chain) => chain,
            Err(_) => vec![self.settings.default_code().to_string()],
        }
    }
}

impl Clone for LanguageContext {
    fn clone(&self) -> Self {
        Self {
            settings: Arc::clone(&self.settings),
            stack: Mutex::new(self.stack.lock().clone()),
        }
    }
}

/// Guard returned by `LanguageContext::scoped`
///
/// Dropping the guard restores the stack to its state before the guard
/// was created. Locks taken after the guard and never released are
/// discarded with it.
#[must_use = "the language is released as soon as the guard is dropped"]
pub struct LanguageLock<'a> {
    context: &'a LanguageContext,
    code: String,
    /// Stack length right after this guard's push
    depth: usize,
}

impl LanguageLock<'_> {
    /// The language this guard locked
    pub fn code(&self) -> &str {
        &self.code
    }
}

impl Drop for LanguageLock<'_> {
    fn drop(&mut self) {
        let mut stack = self.context.stack.lock();
        if stack.len() < self.depth || stack[self.depth - 1] != self.code {
            warn!(
                "Language lock '{}' at depth {} was already released",
                self.code, self.depth
            );
            return;
        }
        if stack.len() > self.depth {
            warn!(
                "Dropping language lock '{}' with {} unreleased inner lock(s)",
                self.code,
                stack.len() - self.depth
            );
        }
        stack.truncate(self.depth - 1);
        trace!("Released language '{}', depth now {}", self.code, stack.len());
    }
}
