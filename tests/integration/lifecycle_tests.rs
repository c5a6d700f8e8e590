/*!
 * Integration tests for entity create, update and delete
 */

use std::sync::Arc;

use multilingual::{
    EntityDraft, EntitySchema, FetchStrategy, LanguageContext, MultilingualError, Predicate, Query,
    Result, TranslationRepository, Value,
};
use crate::common;

#[test]
fn test_create_withTwoLanguages_shouldWriteExactlyTwoRows() -> Result<()> {
    let (repo, ctx) = common::create_test_repo();
    let draft = EntityDraft::new()
        .set("description", "d")
        .translate("cs", "title", "obsah")
        .translate("en", "title", "content");

    let (first, created) = repo.get_or_create(&ctx, "basic", &draft)?;
    assert!(created);
    let (second, created) = repo.get_or_create(&ctx, "basic", &draft)?;
    assert!(!created);

    assert_eq!(first.id, second.id);
    assert_eq!(common::basic_translation_count(&repo, first.id), 2);
    assert_eq!(repo.count(&ctx, &Query::new("basic"))?, 1);
    Ok(())
}

#[test]
fn test_getOrCreate_withDifferentTranslation_shouldCreateNewEntity() -> Result<()> {
    let (repo, ctx) = common::create_test_repo();
    let base = EntityDraft::new().set("description", "d");

    repo.get_or_create(&ctx, "basic", &base.clone().translate("cs", "title", "obsah"))?;
    let (_, created) = repo.get_or_create(&ctx, "basic", &base.translate("cs", "title", "jiný"))?;

    assert!(created);
    assert_eq!(repo.count(&ctx, &Query::new("basic"))?, 2);
    Ok(())
}

#[test]
fn test_createFromFields_withImplicitName_shouldWriteActiveLanguage() -> Result<()> {
    let (repo, ctx) = common::create_test_repo();
    let _guard = ctx.scoped("de")?;

    let entity = repo.create_from_fields(
        &ctx,
        "managing",
        &[("shortcut", Value::from("MATH")), ("name", Value::from("Mathematik"))],
    )?;

    assert_eq!(entity.translations().keys().collect::<Vec<_>>(), vec!["de"]);
    assert_eq!(entity.get("name_de", &ctx)?, Value::from("Mathematik"));
    Ok(())
}

#[test]
fn test_create_withUnknownLanguage_shouldWriteNothing() {
    let (repo, ctx) = common::create_test_repo();
    let draft = EntityDraft::new()
        .set("description", "d")
        .translate("cs", "title", "obsah")
        .translate("fr", "title", "contenu");

    let err = repo.create("basic", &draft).unwrap_err();

    assert!(matches!(err, MultilingualError::UnknownLanguage(_)));
    assert_eq!(repo.count(&ctx, &Query::new("basic")).unwrap(), 0);
}

#[test]
fn test_duplicateTranslationRow_shouldSurfaceIntegrityError() -> Result<()> {
    let (repo, _ctx) = common::create_test_repo();
    let entity = common::create_basic(&repo, "d", &[("cs", Some("obsah"))]);

    let err = repo
        .db()
        .execute(|conn| {
            conn.execute(
                "INSERT INTO basic_translation (master_id, language_code, title) VALUES (?1, 'cs', 'dup')",
                [entity.id],
            )?;
            Ok(())
        })
        .unwrap_err();

    assert!(err.is_integrity());
    assert_eq!(common::basic_translation_count(&repo, entity.id), 1);
    Ok(())
}

#[test]
fn test_update_shouldGetOrCreatePerLanguage() -> Result<()> {
    let (repo, ctx) = common::create_test_repo();
    let mut entity = common::create_basic(&repo, "d", &[("cs", Some("obsah"))]);

    {
        let _guard = ctx.scoped("en")?;
        repo.update(&ctx, &mut entity, &[("title", Value::from("content")), ("description", Value::from("d2"))])?;
    }
    repo.update(&ctx, &mut entity, &[("title", Value::from("nový obsah"))])?;

    assert_eq!(common::basic_translation_count(&repo, entity.id), 2);

    let reloaded = repo.get_by_id(&ctx, "basic", entity.id)?;
    assert_eq!(reloaded.get("description", &ctx)?, Value::from("d2"));
    assert_eq!(reloaded.get("title", &ctx)?, Value::from("nový obsah"));
    assert_eq!(reloaded.get("title_en", &ctx)?, Value::from("content"));
    assert_eq!(entity.get("title_en", &ctx)?, Value::from("content"));
    Ok(())
}

#[test]
fn test_update_onDeferredEntity_shouldMarkWrittenLanguageLoaded() -> Result<()> {
    let (repo, ctx) = common::create_test_repo();
    common::create_basic(&repo, "d", &[("cs", Some("obsah"))]);
    let mut entity = repo
        .fetch(&ctx, &Query::new("basic"), multilingual::FetchStrategy::Deferred)?
        .remove(0);

    repo.update(&ctx, &mut entity, &[("title_de", Value::from("Inhalt"))])?;

    assert_eq!(entity.get("title_de", &ctx)?, Value::from("Inhalt"));
    assert!(matches!(
        entity.get("title_cs", &ctx),
        Err(MultilingualError::TranslationNotLoaded { .. })
    ));
    Ok(())
}

#[test]
fn test_update_withNullForExistingRow_shouldClearValue() -> Result<()> {
    let (repo, ctx) = common::create_test_repo();
    let mut entity = common::create_basic(&repo, "d", &[("cs", Some("obsah")), ("en", Some("content"))]);

    repo.update(&ctx, &mut entity, &[("title_en", Value::Null)])?;

    assert_eq!(common::basic_translation_count(&repo, entity.id), 2);
    let _guard = ctx.scoped("en")?;
    assert_eq!(entity.get("title", &ctx)?, Value::from("obsah"));
    Ok(())
}

#[test]
fn test_update_ofDeletedEntity_shouldReportNotFound() -> Result<()> {
    let (repo, ctx) = common::create_test_repo();
    let entity = common::create_basic(&repo, "d", &[]);
    let mut stale = entity.clone();
    repo.delete(entity)?;

    let err = repo
        .update(&ctx, &mut stale, &[("title_en", Value::from("content"))])
        .unwrap_err();

    assert!(matches!(err, MultilingualError::NotFound { .. }));
    assert_eq!(common::basic_translation_count(&repo, stale.id), 0);
    Ok(())
}

#[test]
fn test_delete_shouldRemoveTranslationsAndEntity() -> Result<()> {
    let (repo, ctx) = common::create_test_repo();
    let entity = common::create_basic(&repo, "d", &[("cs", Some("obsah")), ("en", Some("content"))]);
    let id = entity.id;

    repo.delete(entity)?;

    assert_eq!(common::basic_translation_count(&repo, id), 0);
    assert!(matches!(
        repo.get_by_id(&ctx, "basic", id),
        Err(MultilingualError::NotFound { .. })
    ));
    Ok(())
}

#[test]
fn test_deleteWhere_shouldCascadeToMatchingEntitiesOnly() -> Result<()> {
    let (repo, ctx) = common::create_test_repo();
    let keep = common::create_basic(&repo, "keep", &[("cs", Some("zůstává"))]);
    let drop_a = common::create_basic(&repo, "drop", &[("cs", Some("pryč")), ("en", Some("gone"))]);
    let drop_b = common::create_basic(&repo, "drop", &[("de", Some("weg"))]);

    let removed = repo.delete_where(&ctx, &Query::new("basic").filter(Predicate::new("description", "drop")))?;

    assert_eq!(removed, 2);
    assert_eq!(common::basic_translation_count(&repo, drop_a.id), 0);
    assert_eq!(common::basic_translation_count(&repo, drop_b.id), 0);
    assert_eq!(common::basic_translation_count(&repo, keep.id), 1);
    Ok(())
}

#[test]
fn test_deleteTranslations_withEmptyKeepList_shouldRemoveAll() -> Result<()> {
    let (repo, ctx) = common::create_test_repo();
    let mut entity = common::create_basic(&repo, "d", &[("cs", Some("obsah")), ("en", Some("content"))]);

    assert_eq!(repo.delete_translations(&mut entity, &[])?, 2);
    assert_eq!(entity.get("title", &ctx)?, Value::Null);
    assert_eq!(common::basic_translation_count(&repo, entity.id), 0);
    Ok(())
}

#[test]
fn test_deleteTranslations_shouldResetToDefaultLanguage() -> Result<()> {
    let (repo, ctx) = common::create_test_repo();
    let mut entity = common::create_basic(
        &repo,
        "d",
        &[("cs", Some("obsah")), ("en", Some("content")), ("de", Some("Inhalt"))],
    );

    let removed = repo.delete_translations(&mut entity, &["cs"])?;
    assert_eq!(removed, 2);

    let _guard = ctx.scoped("de")?;
    let reloaded = repo.get_by_id(&ctx, "basic", entity.id)?;
    assert_eq!(reloaded.get("title", &ctx)?, Value::from("obsah"));
    assert_eq!(reloaded.translations().len(), 1);

    assert!(matches!(
        repo.delete_translations(&mut entity, &["fr"]),
        Err(MultilingualError::UnknownLanguage(_))
    ));
    Ok(())
}

#[test]
fn test_keywordNamedFields_shouldRoundTrip() -> Result<()> {
    let settings = common::settings();
    let repo = TranslationRepository::new_in_memory(
        Arc::clone(&settings),
        [EntitySchema::new("menu", &["order"], &["group"])],
    )?;
    let ctx = LanguageContext::new(settings);

    let draft = EntityDraft::new()
        .set("order", 2i64)
        .translate("cs", "group", "hlavní")
        .translate("en", "group", "main");
    let mut entity = repo.create("menu", &draft)?;
    repo.update(&ctx, &mut entity, &[("order", Value::from(3i64)), ("group_de", Value::from("Haupt"))])?;
    repo.update(&ctx, &mut entity, &[("group_de", Value::from("Haupt 2"))])?;

    let _guard = ctx.scoped("en")?;
    let query = Query::new("menu")
        .filter(Predicate::new("group__startswith", "ma"))
        .order_by(&["-order"]);
    let rows = repo.values_list(&ctx, &query, &["order", "group", "group_de"])?;
    assert_eq!(rows, vec![vec![Value::from(3i64), Value::from("main"), Value::from("Haupt 2")]]);

    let fetched = repo.fetch(&ctx, &Query::new("menu"), FetchStrategy::SelectRelated)?;
    assert_eq!(fetched[0].get("group_cs", &ctx)?, Value::from("hlavní"));
    assert_eq!(repo.stats()?.entities[0].translation_rows, 3);

    assert_eq!(repo.delete_translations(&mut entity, &["cs"])?, 2);
    assert_eq!(repo.delete_where(&ctx, &Query::new("menu"))?, 1);
    assert_eq!(repo.count(&ctx, &Query::new("menu"))?, 0);
    Ok(())
}
