/*!
 * Tests for the active-language context
 */

use std::sync::Arc;
use std::thread;

use multilingual::{LanguageContext, MultilingualError, Result};
use crate::common;

#[test]
fn test_lockRelease_withNestedLocks_shouldRestorePreviousLanguage() -> Result<()> {
    let ctx = LanguageContext::new(common::settings());

    ctx.lock("en")?;
    ctx.lock("de")?;
    ctx.release()?;
    assert_eq!(ctx.get_active(), "en");

    ctx.release()?;
    assert_eq!(ctx.get_active(), "cs");

    assert!(matches!(ctx.release(), Err(MultilingualError::State(_))));
    Ok(())
}

#[test]
fn test_lock_withSameLanguageTwice_shouldNeedTwoReleases() -> Result<()> {
    let ctx = LanguageContext::new(common::settings());

    ctx.lock("en")?;
    ctx.lock("en")?;
    ctx.release()?;
    assert_eq!(ctx.get_active(), "en");
    ctx.release()?;
    assert_eq!(ctx.get_active(), "cs");
    Ok(())
}

#[test]
fn test_lock_withUppercaseCode_shouldNormalize() -> Result<()> {
    let ctx = LanguageContext::new(common::settings());
    let _guard = ctx.scoped("EN")?;
    assert_eq!(ctx.get_active(), "en");
    Ok(())
}

#[test]
fn test_scoped_withEarlyReturn_shouldStillRelease() {
    let ctx = LanguageContext::new(common::settings());

    fn failing(ctx: &LanguageContext) -> Result<()> {
        let _guard = ctx.scoped("de")?;
        ctx.lock("fr")?;
        Ok(())
    }

    assert!(matches!(failing(&ctx), Err(MultilingualError::UnknownLanguage(_))));
    assert_eq!(ctx.lock_depth(), 0);
    assert_eq!(ctx.get_active(), "cs");
}

#[test]
fn test_fallbackChain_shouldListRequestedThenDefault() -> Result<()> {
    let ctx = LanguageContext::new(common::settings());
    assert_eq!(ctx.get_fallback_chain("de")?, vec!["de", "cs"]);
    assert_eq!(ctx.get_fallback_chain("cs")?, vec!["cs"]);

    let _guard = ctx.scoped("en")?;
    assert_eq!(ctx.active_chain(), vec!["en", "cs"]);
    Ok(())
}

#[test]
fn test_fork_acrossThreads_shouldIsolateRequests() {
    let shared = Arc::new(LanguageContext::new(common::settings()));

    let handles: Vec<_> = ["en", "de"]
        .into_iter()
        .map(|code| {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                let request = shared.fork();
                let _guard = request.scoped(code).unwrap();
                thread::yield_now();
                request.get_active()
            })
        })
        .collect();

    let seen: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(seen, vec!["en", "de"]);
    assert_eq!(shared.get_active(), "cs");
}

#[test]
fn test_names_shouldDescribeEveryConfiguredLanguage() {
    let ctx = LanguageContext::new(common::settings());
    let names = ctx.names();
    assert_eq!(names.len(), 3);
    assert_eq!(names["en"], "English");
    assert_eq!(names["de"], "German");
}
