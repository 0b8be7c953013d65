//! Integration tests for typed queries against an index.

use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use divan::document::{Document, Value};
use divan::error::Result;
use divan::index::{IndexDefinition, IndexQuery};
use divan::query::{Query, QueryCompiler, field};
use divan::storage::{IndexStorage, IndexStorageConfig};

fn people() -> IndexDefinition {
    IndexDefinition::map(|doc: &Document| Ok(vec![Value::Object(doc.body.clone())]))
        .store_field("Name")
        .store_field("Age")
}

fn person(id: &str, name: &str, age: i64, birthday: (i32, u32, u32)) -> Document {
    let (year, month, day) = birthday;
    Document::builder(id)
        .field("Name", name)
        .field("Age", age)
        .field(
            "Birthday",
            Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap(),
        )
        .build()
}

fn seeded() -> Result<(TempDir, IndexStorage)> {
    let dir = TempDir::new()?;
    let storage = IndexStorage::open(IndexStorageConfig::new(dir.path()))?;
    storage.create_index("People", people())?;
    storage.index(
        "People",
        &[
            person("people/1", "ayende", 3, (2007, 1, 1)),
            person("people/2", "oren", 30, (2012, 6, 1)),
            person("people/3", "rahien", 12, (2010, 5, 20)),
        ],
    )?;
    Ok((dir, storage))
}

fn names(storage: &IndexStorage, query: &Query) -> Result<Vec<String>> {
    let result = storage.query("People", &IndexQuery::from_query(query)?)?;
    let mut names: Vec<String> = result
        .hits
        .iter()
        .filter_map(|hit| hit.get("Name").and_then(Value::as_str).map(str::to_string))
        .collect();
    names.sort();
    Ok(names)
}

#[test]
fn test_compiled_output_strings() -> Result<()> {
    let may_15 = Utc.with_ymd_and_hms(2010, 5, 15, 0, 0, 0).unwrap();

    let query = Query::new()
        .filter(field("Name").eq("ayende"))
        .filter(field("Email").eq("ayende@ayende.com"));
    assert_eq!(
        QueryCompiler::compile(&query)?,
        "Name:ayende AND Email:ayende@ayende.com "
    );

    let query = Query::new().filter(field("Age").gt(3));
    assert_eq!(QueryCompiler::compile(&query)?, "Age_Range:[0x00000003 TO NULL] ");

    let query = Query::new().filter(field("Birthday").le(may_15));
    assert_eq!(
        QueryCompiler::compile(&query)?,
        "Birthday:{NULL TO 20100515000000000} "
    );

    let query = Query::new()
        .filter(field("Birthday").ge(may_15))
        .select(["Name", "Age"]);
    assert_eq!(
        QueryCompiler::compile(&query)?,
        "<Name, Age>: Birthday:{20100515000000000 TO NULL} "
    );
    Ok(())
}

#[test]
fn test_equality_queries_hit_the_index() -> Result<()> {
    let (_dir, storage) = seeded()?;
    let query = Query::new().filter(field("Name").eq("oren"));
    assert_eq!(names(&storage, &query)?, vec!["oren"]);

    let query = Query::new().filter(field("Age").eq(12));
    assert_eq!(names(&storage, &query)?, vec!["rahien"]);
    Ok(())
}

#[test]
fn test_numeric_range_queries_use_the_range_field() -> Result<()> {
    let (_dir, storage) = seeded()?;
    let query = Query::new().filter(field("Age").gt(10));
    assert_eq!(names(&storage, &query)?, vec!["oren", "rahien"]);

    let query = Query::new().filter(field("Age").lt(10));
    assert_eq!(names(&storage, &query)?, vec!["ayende"]);
    Ok(())
}

#[test]
fn test_datetime_range_queries() -> Result<()> {
    let (_dir, storage) = seeded()?;
    let may_15 = Utc.with_ymd_and_hms(2010, 5, 15, 0, 0, 0).unwrap();

    let query = Query::new().filter(field("Birthday").gt(may_15));
    assert_eq!(names(&storage, &query)?, vec!["oren", "rahien"]);

    let query = Query::new().filter(field("Birthday").lt(may_15));
    assert_eq!(names(&storage, &query)?, vec!["ayende"]);
    Ok(())
}

#[test]
fn test_disjunction_and_projection() -> Result<()> {
    let (_dir, storage) = seeded()?;
    let query = Query::new()
        .filter(field("Name").eq("ayende") | field("Name").eq("oren"))
        .select(["Name"]);

    let result = storage.query("People", &IndexQuery::from_query(&query)?)?;
    assert_eq!(result.total_results, 2);
    assert!(result.hits.iter().all(|hit| hit.fields.len() == 1));
    Ok(())
}

#[test]
fn test_unsupported_shapes_fail_to_compile() {
    let query = Query::new().filter(field("Name").ne("ayende"));
    assert!(QueryCompiler::compile(&query).unwrap_err().is_compilation());

    let query = Query::new().filter(field("Name").gt("a"));
    assert!(QueryCompiler::compile(&query).unwrap_err().is_compilation());

    let query = Query::new().filter(field("Address").member("City").eq("Hadera"));
    assert!(QueryCompiler::compile(&query).unwrap_err().is_compilation());

    assert_eq!(QueryCompiler::compile(&Query::new()).unwrap(), "");
}

#[test]
fn test_bracketed_values_match_as_terms() -> Result<()> {
    let (_dir, storage) = seeded()?;
    storage.index(
        "People",
        &[
            person("people/4", "[draft]", 40, (2001, 1, 1)),
            person("people/5", "draft", 41, (2001, 1, 1)),
        ],
    )?;

    let query = Query::new().filter(field("Name").eq("[draft]"));
    assert_eq!(QueryCompiler::compile(&query)?, "Name:\"[draft]\" ");
    assert_eq!(names(&storage, &query)?, vec!["[draft]"]);
    Ok(())
}
