/*!
 * Integration tests for filtering, ordering and projections
 */

use multilingual::{MultilingualError, Predicate, Query, Result, TranslationRepository, Value};
use crate::common;

/// Three entities with uneven coverage:
/// - `a`: cs "a1", en "b"
/// - `b`: cs "c"
/// - `c`: de "z"
fn mixed_coverage() -> (TranslationRepository, multilingual::LanguageContext) {
    let (repo, ctx) = common::create_test_repo();
    common::create_basic(&repo, "a", &[("cs", Some("a1")), ("en", Some("b"))]);
    common::create_basic(&repo, "b", &[("cs", Some("c"))]);
    common::create_basic(&repo, "c", &[("de", Some("z"))]);
    (repo, ctx)
}

fn descriptions(repo: &TranslationRepository, ctx: &multilingual::LanguageContext, query: Query) -> Vec<Option<String>> {
    common::texts(repo.values_list_flat(ctx, &query, "description").unwrap())
}

fn some(values: &[&str]) -> Vec<Option<String>> {
    values.iter().map(|v| Some(v.to_string())).collect()
}

#[test]
fn test_filter_onImplicitField_shouldMatchResolvedValueOnly() -> Result<()> {
    let (repo, ctx) = common::create_test_repo();
    common::create_basic(&repo, "A", &[("cs", Some("alpha")), ("en", Some("beta"))]);
    common::create_basic(&repo, "B", &[("cs", Some("beta"))]);
    common::create_basic(&repo, "C", &[("de", Some("beta"))]);

    {
        let _guard = ctx.scoped("en")?;
        let beta = Query::new("basic").filter(Predicate::new("title", "beta"));
        assert_eq!(descriptions(&repo, &ctx, beta), some(&["A", "B"]));

        // `alpha` exists for A, but only in a language the chain did not select
        let alpha = Query::new("basic").filter(Predicate::new("title", "alpha"));
        assert_eq!(repo.count(&ctx, &alpha)?, 0);
    }

    let beta = Query::new("basic").filter(Predicate::new("title", "beta"));
    assert_eq!(descriptions(&repo, &ctx, beta), some(&["B"]));
    Ok(())
}

#[test]
fn test_filter_onExplicitField_shouldIgnoreActiveLanguage() -> Result<()> {
    let (repo, ctx) = mixed_coverage();
    for code in ["cs", "en", "de"] {
        let _guard = ctx.scoped(code)?;
        let query = Query::new("basic").filter(Predicate::new("title_de", "z"));
        assert_eq!(descriptions(&repo, &ctx, query), some(&["c"]));
    }
    Ok(())
}

#[test]
fn test_orderBy_implicitAscending_shouldPlaceNullsLast() -> Result<()> {
    let (repo, ctx) = mixed_coverage();
    let _guard = ctx.scoped("en")?;

    let query = Query::new("basic").order_by(&["title"]);
    assert_eq!(descriptions(&repo, &ctx, query), some(&["a", "b", "c"]));

    let titles = repo.values_list_flat(&ctx, &Query::new("basic").order_by(&["title"]), "title")?;
    assert_eq!(
        common::texts(titles),
        vec![Some("b".to_string()), Some("c".to_string()), None]
    );
    Ok(())
}

#[test]
fn test_orderBy_implicitDescending_shouldPlaceNullsFirst() -> Result<()> {
    let (repo, ctx) = mixed_coverage();
    let _guard = ctx.scoped("en")?;

    let query = Query::new("basic").order_by(&["-title"]);
    assert_eq!(descriptions(&repo, &ctx, query), some(&["c", "b", "a"]));
    Ok(())
}

#[test]
fn test_orderBy_withTies_shouldBreakOnPrimaryKey() -> Result<()> {
    let (repo, ctx) = common::create_test_repo();
    common::create_basic(&repo, "first", &[("cs", Some("same"))]);
    common::create_basic(&repo, "second", &[("cs", Some("same"))]);

    for key in ["title", "-title"] {
        let query = Query::new("basic").order_by(&[key]);
        assert_eq!(descriptions(&repo, &ctx, query), some(&["first", "second"]));
    }
    Ok(())
}

#[test]
fn test_exclude_shouldKeepRowsWithNullResolvedValue() -> Result<()> {
    let (repo, ctx) = mixed_coverage();
    let _guard = ctx.scoped("en")?;

    let query = Query::new("basic").exclude(Predicate::new("title", "b"));
    assert_eq!(descriptions(&repo, &ctx, query), some(&["b", "c"]));

    let query = Query::new("basic").exclude(Predicate::new("title__isnull", true));
    assert_eq!(descriptions(&repo, &ctx, query), some(&["a", "b"]));
    Ok(())
}

#[test]
fn test_lookups_shouldApplyToVirtualAndPlainFields() -> Result<()> {
    let (repo, ctx) = common::create_test_repo();
    common::create_managing(&repo, "CHEM", &[("cs", "Chemie"), ("en", "Chemistry")]);
    common::create_managing(&repo, "PHYS", &[("cs", "Fyzika"), ("en", "Physics")]);
    common::create_managing(&repo, "MATH", &[("cs", "Matematika")]);

    let shortcuts = |query: Query| -> Vec<Option<String>> {
        common::texts(repo.values_list_flat(&ctx, &query.order_by(&["shortcut"]), "shortcut").unwrap())
    };

    assert_eq!(
        shortcuts(Query::new("managing").filter(Predicate::new("name_en__icontains", "IST"))),
        some(&["CHEM"])
    );
    assert_eq!(
        shortcuts(Query::new("managing").filter(Predicate::new("name__startswith", "F"))),
        some(&["PHYS"])
    );
    assert_eq!(
        shortcuts(Query::new("managing").filter(Predicate::new("name__iexact", "matematika"))),
        some(&["MATH"])
    );
    assert_eq!(
        shortcuts(Query::new("managing").filter(Predicate::new("name_cs__endswith", "ka"))),
        some(&["MATH", "PHYS"])
    );
    assert_eq!(
        shortcuts(Query::new("managing").filter(Predicate::is_in("shortcut", ["MATH", "CHEM"]))),
        some(&["CHEM", "MATH"])
    );
    assert_eq!(
        shortcuts(Query::new("managing").filter(Predicate::new("name_en__isnull", true))),
        some(&["MATH"])
    );
    assert_eq!(
        shortcuts(Query::new("managing").filter(Predicate::new("shortcut__gt", "D"))),
        some(&["MATH", "PHYS"])
    );
    assert_eq!(
        shortcuts(
            Query::new("managing")
                .filter(Predicate::new("name_cs", "Chemie").or(Predicate::new("name_en", "Physics")))
        ),
        some(&["CHEM", "PHYS"])
    );
    assert!(shortcuts(Query::new("managing").filter(Predicate::is_in("shortcut", Vec::<Value>::new()))).is_empty());
    Ok(())
}

#[test]
fn test_explicitJoins_shouldNeverDuplicateRows() -> Result<()> {
    let (repo, ctx) = common::create_test_repo();
    common::create_basic(
        &repo,
        "d",
        &[("cs", Some("obsah")), ("en", Some("content")), ("de", Some("Inhalt"))],
    );

    let query = Query::new("basic")
        .filter(Predicate::new("title_cs", "obsah"))
        .order_by(&["title_en", "-title_de"]);
    let rows = repo.values(&ctx, &query, &["title_cs", "title_en", "title_de", "title"])?;

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("title_de"), Some(&Value::from("Inhalt")));
    assert_eq!(rows[0].get("title"), Some(&Value::from("obsah")));
    assert_eq!(repo.count(&ctx, &query)?, 1);
    Ok(())
}

#[test]
fn test_values_withoutFields_shouldReturnEveryField() -> Result<()> {
    let (repo, ctx) = common::create_test_repo();
    let created = common::create_basic(&repo, "d", &[("cs", Some("obsah"))]);

    let rows = repo.values(&ctx, &Query::new("basic"), &[])?;

    let names: Vec<&str> = rows[0].columns.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["id", "description", "title"]);
    assert_eq!(rows[0].get("id"), Some(&Value::Integer(created.id)));

    let tuples = repo.values_list(&ctx, &Query::new("basic"), &["description", "title_en"])?;
    assert_eq!(tuples, vec![vec![Value::from("d"), Value::Null]]);
    Ok(())
}

#[test]
fn test_limitOffset_shouldSliceOrderedResults() -> Result<()> {
    let (repo, ctx) = common::create_test_repo();
    for name in ["e1", "e2", "e3", "e4"] {
        common::create_basic(&repo, name, &[("cs", Some(name))]);
    }

    let page = Query::new("basic").order_by(&["-title"]).limit(2).offset(1);
    assert_eq!(descriptions(&repo, &ctx, page), some(&["e3", "e2"]));

    let tail = Query::new("basic").order_by(&["title"]).offset(3);
    assert_eq!(descriptions(&repo, &ctx, tail), some(&["e4"]));

    assert_eq!(repo.count(&ctx, &Query::new("basic").limit(3))?, 3);
    Ok(())
}

#[test]
fn test_get_shouldRequireExactlyOneMatch() -> Result<()> {
    let (repo, ctx) = mixed_coverage();

    let found = repo.get(&ctx, &Query::new("basic").filter(Predicate::new("title_de", "z")))?;
    assert_eq!(found.get("description", &ctx)?, Value::from("c"));

    let missing = repo.get(&ctx, &Query::new("basic").filter(Predicate::new("title", "nothing")));
    assert!(matches!(missing, Err(MultilingualError::NotFound { .. })));

    let many = repo.get(&ctx, &Query::new("basic"));
    assert!(matches!(many, Err(MultilingualError::MultipleObjectsReturned { count: 3, .. })));

    assert!(repo.exists(&ctx, &Query::new("basic").filter(Predicate::new("title_en", "b")))?);
    assert!(!repo.exists(&ctx, &Query::new("basic").filter(Predicate::new("title_en", "z")))?);
    Ok(())
}
