/*!
 * Tests that field names mean the same thing at every call site
 */

use multilingual::query::resolver::{resolve_field, FieldRef, LanguageMode};
use multilingual::{FetchStrategy, MultilingualError, Predicate, Projection, Query, Result, TranslationQueryPlanner};
use crate::common;

#[test]
fn test_resolveField_shouldClassifyEveryKind() -> Result<()> {
    let settings = common::settings();
    let schema = common::basic_schema();

    assert_eq!(resolve_field(&schema, &settings, "description")?, FieldRef::Plain("description".into()));
    assert_eq!(
        resolve_field(&schema, &settings, "title")?,
        FieldRef::Translated {
            field: "title".into(),
            mode: LanguageMode::Implicit
        }
    );
    assert_eq!(
        resolve_field(&schema, &settings, "title_de")?,
        FieldRef::Translated {
            field: "title".into(),
            mode: LanguageMode::Explicit("de".into())
        }
    );
    Ok(())
}

#[test]
fn test_implicitField_shouldAgreeAcrossReadFilterOrderAndValues() -> Result<()> {
    let (repo, ctx) = common::create_test_repo();
    common::create_basic(&repo, "a", &[("cs", Some("obsah"))]);
    common::create_basic(&repo, "b", &[("cs", Some("zprava")), ("en", Some("article"))]);

    let _guard = ctx.scoped("en")?;

    // read
    let entities = repo.fetch(&ctx, &Query::new("basic").order_by(&["description"]), FetchStrategy::Prefetch)?;
    let read: Vec<Option<String>> = entities
        .iter()
        .map(|e| e.get_str("title", &ctx))
        .collect::<Result<_>>()?;
    assert_eq!(read, vec![Some("obsah".to_string()), Some("article".to_string())]);

    // values
    let projected = repo.values_list_flat(&ctx, &Query::new("basic").order_by(&["description"]), "title")?;
    assert_eq!(common::texts(projected), read);

    // filter
    let filtered = repo.count(&ctx, &Query::new("basic").filter(Predicate::new("title", "obsah")))?;
    assert_eq!(filtered, 1);

    // order
    let ordered = repo.values_list_flat(&ctx, &Query::new("basic").order_by(&["title"]), "description")?;
    assert_eq!(common::texts(ordered), vec![Some("b".to_string()), Some("a".to_string())]);
    Ok(())
}

#[test]
fn test_unknownField_shouldFailAtEveryCallSite() {
    let (repo, ctx) = common::create_test_repo();
    let entity = common::create_basic(&repo, "a", &[("cs", Some("obsah"))]);

    assert!(matches!(entity.get("titel", &ctx), Err(MultilingualError::Resolution { .. })));
    assert!(matches!(
        repo.count(&ctx, &Query::new("basic").filter(Predicate::new("titel", "x"))),
        Err(MultilingualError::Resolution { .. })
    ));
    assert!(matches!(
        repo.fetch(&ctx, &Query::new("basic").order_by(&["-titel"]), FetchStrategy::Prefetch),
        Err(MultilingualError::Resolution { .. })
    ));
    assert!(matches!(
        repo.values(&ctx, &Query::new("basic"), &["titel"]),
        Err(MultilingualError::Resolution { .. })
    ));
}

#[test]
fn test_unconfiguredLanguageSuffix_shouldReportUnknownLanguage() {
    let (repo, ctx) = common::create_test_repo();
    let err = repo
        .values(&ctx, &Query::new("basic"), &["title_fr"])
        .unwrap_err();
    assert!(matches!(err, MultilingualError::UnknownLanguage(code) if code == "fr"));
}

#[test]
fn test_planner_shouldCollapseJoinsPerLanguage() -> Result<()> {
    let (repo, ctx) = common::create_test_repo();
    let planner = TranslationQueryPlanner::new(repo.registry(), &ctx);

    let same = planner.plan(
        &Query::new("basic")
            .filter(Predicate::new("title_en__startswith", "c"))
            .order_by(&["-title_en"]),
        &Projection::Values(vec!["title_en".into(), "description".into()]),
    )?;
    assert_eq!(same.join_count, 1);

    let mixed = planner.plan(
        &Query::new("basic").filter(Predicate::new("title_en", "c")),
        &Projection::Values(vec!["title_de".into(), "title".into()]),
    )?;
    assert_eq!(mixed.join_count, 2);
    Ok(())
}
