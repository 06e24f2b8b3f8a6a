//! Repository operations against an in-memory server: a submission graph
//! saved through structured merges and read back, paging, and transactions.

mod common;

use asupersync::runtime::RuntimeBuilder;
use common::*;
use regex::Regex;
use tsqlmodel::prelude::*;
use tsqlmodel::{AttributeRef, MergeInto};

type ElementType = FieldValueElementTableTypeRow;

#[derive(Debug, Clone, PartialEq)]
enum Element {
    Date(i32),
    Float(f64),
    Integer(i64),
    Money(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
struct Answer {
    field_id: i32,
    elements: Vec<Element>,
}

#[derive(Debug, Clone, PartialEq)]
struct Submission {
    subject: String,
    answers: Vec<Answer>,
}

fn forms_server() -> MemoryServer {
    MemoryServer::new()
        .with_identity("GenericSubmission", "GenericSubmissionId")
        .with_identity("FieldValue", "FieldValueId")
        .with_identity("FieldValueElement", "FieldValueElementId")
}

fn category_server() -> MemoryServer {
    let server = MemoryServer::new().with_identity("Category", "CategoryId");
    server.seed(
        "Category",
        (1..=5)
            .map(|id| {
                vec![
                    ("CategoryId", Value::Int(id)),
                    ("Name", Value::Text(format!("Category {id}"))),
                ]
            })
            .collect(),
    );
    server
}

fn sample() -> Submission {
    Submission {
        subject: "Annual review".into(),
        answers: vec![
            Answer {
                field_id: 10,
                elements: vec![Element::Date(19_000), Element::Text("on time".into())],
            },
            Answer {
                field_id: 11,
                elements: vec![
                    Element::Float(0.25),
                    Element::Integer(12_000_000_000),
                    Element::Money(19.99),
                ],
            },
        ],
    }
}

fn element_row(field_value_id: i32, order: usize, element: &Element) -> ElementType {
    let mut row = ElementType {
        field_value_id,
        order: i32::try_from(order).expect("order fits in i32"),
        ..Default::default()
    };
    match element {
        Element::Date(v) => row.date_element = Some(*v),
        Element::Float(v) => row.float_element = Some(*v),
        Element::Integer(v) => row.integer_element = Some(*v),
        Element::Money(v) => row.money_element = Some(*v),
        Element::Text(v) => row.text_element = Some(v.clone()),
    }
    row
}

fn value_of(attribute: AttributeRef) -> DerivedSource {
    DerivedSource::new()
        .column(ElementType::FIELD_VALUE_ELEMENT_ID)
        .column_as(attribute.clone(), "Value")
        .where_not_null(attribute)
}

/// Merge every answer's elements, then fan the typed values out.
async fn merge_elements(
    cx: &Cx,
    repository: &impl EntityRepository,
    answers: &[(i32, &Answer)],
) -> Vec<ElementType> {
    let rows: Vec<ElementType> = answers
        .iter()
        .flat_map(|(field_value_id, answer)| {
            answer
                .elements
                .iter()
                .enumerate()
                .map(move |(order, element)| element_row(*field_value_id, order, element))
        })
        .collect();

    let command = StructuredMergeCommand::new(rows).merge_into(
        |merge: MergeInto<FieldValueElementRow>| {
            merge
                .on([
                    FieldValueElementRow::FIELD_VALUE_ID,
                    FieldValueElementRow::ORDER,
                ])
                .delete_unmatched_in_source(FieldValueElementRow::FIELD_VALUE_ID)
                .select_from_inserted()
        },
    );
    let merged = unwrap_outcome(repository.merge(cx, &command).await);
    assert!(merged.iter().all(|row| row.field_value_element_id.is_some()));

    let fan_out = StructuredMergeCommand::new(merged.clone())
        .merge_into(|m: MergeInto<DateElementRow>| m.from(value_of(ElementType::DATE_ELEMENT)))
        .merge_into(|m: MergeInto<FloatElementRow>| m.from(value_of(ElementType::FLOAT_ELEMENT)))
        .merge_into(|m: MergeInto<IntegerElementRow>| {
            m.from(value_of(ElementType::INTEGER_ELEMENT))
        })
        .merge_into(|m: MergeInto<MoneyElementRow>| m.from(value_of(ElementType::MONEY_ELEMENT)))
        .merge_into(|m: MergeInto<TextElementRow>| m.from(value_of(ElementType::TEXT_ELEMENT)));
    let affected = unwrap_outcome(repository.merge_count(cx, &fan_out).await);
    assert_eq!(affected, merged.len() as u64);
    merged
}

async fn save_submission(
    cx: &Cx,
    repository: &impl EntityRepository,
    submission: &Submission,
) -> i32 {
    let mut row = GenericSubmissionRow {
        generic_submission_id: 0,
        subject: submission.subject.clone(),
    };
    unwrap_outcome(repository.insert(cx, &mut row).await);

    let mut answers = Vec::with_capacity(submission.answers.len());
    for answer in &submission.answers {
        let mut value = FieldValueRow {
            field_value_id: 0,
            generic_submission_id: row.generic_submission_id,
            field_id: answer.field_id,
        };
        unwrap_outcome(repository.insert(cx, &mut value).await);
        answers.push((value.field_value_id, answer));
    }
    merge_elements(cx, repository, &answers).await;
    row.generic_submission_id
}

async fn field_values(cx: &Cx, repository: &impl EntityRepository, id: i32) -> Vec<FieldValueRow> {
    let selection = Selection::<FieldValueRow>::new()
        .equal_to(FieldValueRow::GENERIC_SUBMISSION_ID, id)
        .order_by(FieldValueRow::FIELD_VALUE_ID);
    unwrap_outcome(repository.select_entities(cx, &selection).await)
}

async fn load_submission(cx: &Cx, repository: &impl EntityRepository, id: i32) -> Submission {
    let selection = Selection::<GenericSubmissionRow>::new()
        .equal_to(GenericSubmissionRow::GENERIC_SUBMISSION_ID, id);
    let row = unwrap_outcome(repository.first_or_default(cx, &selection).await)
        .expect("submission exists");

    let values = field_values(cx, repository, id).await;
    let elements = unwrap_outcome(
        repository
            .select_entities(
                cx,
                &Selection::<FieldValueElementRow>::new()
                    .include(
                        FieldValueElementRow::FIELD_VALUE_ID,
                        values.iter().map(|v| v.field_value_id),
                    )
                    .order_by(FieldValueElementRow::FIELD_VALUE_ID)
                    .order_by(FieldValueElementRow::ORDER),
            )
            .await,
    );
    let ids: Vec<i32> = elements.iter().map(|e| e.field_value_element_id).collect();

    let dates = unwrap_outcome(
        repository
            .select_entities(
                cx,
                &Selection::<DateElementRow>::new()
                    .include(DateElementRow::FIELD_VALUE_ELEMENT_ID, ids.clone()),
            )
            .await,
    );
    let floats = unwrap_outcome(
        repository
            .select_entities(
                cx,
                &Selection::<FloatElementRow>::new()
                    .include(FloatElementRow::FIELD_VALUE_ELEMENT_ID, ids.clone()),
            )
            .await,
    );
    let integers = unwrap_outcome(
        repository
            .select_entities(
                cx,
                &Selection::<IntegerElementRow>::new()
                    .include(IntegerElementRow::FIELD_VALUE_ELEMENT_ID, ids.clone()),
            )
            .await,
    );
    let money = unwrap_outcome(
        repository
            .select_entities(
                cx,
                &Selection::<MoneyElementRow>::new()
                    .include(MoneyElementRow::FIELD_VALUE_ELEMENT_ID, ids.clone()),
            )
            .await,
    );
    let texts = unwrap_outcome(
        repository
            .select_entities(
                cx,
                &Selection::<TextElementRow>::new()
                    .include(TextElementRow::FIELD_VALUE_ELEMENT_ID, ids),
            )
            .await,
    );

    let typed = |id: i32| -> Element {
        if let Some(e) = dates.iter().find(|e| e.field_value_element_id == id) {
            Element::Date(e.value)
        } else if let Some(e) = floats.iter().find(|e| e.field_value_element_id == id) {
            Element::Float(e.value)
        } else if let Some(e) = integers.iter().find(|e| e.field_value_element_id == id) {
            Element::Integer(e.value)
        } else if let Some(e) = money.iter().find(|e| e.field_value_element_id == id) {
            Element::Money(e.value)
        } else if let Some(e) = texts.iter().find(|e| e.field_value_element_id == id) {
            Element::Text(e.value.clone())
        } else {
            panic!("element {id} has no typed value")
        }
    };

    Submission {
        subject: row.subject,
        answers: values
            .iter()
            .map(|value| Answer {
                field_id: value.field_id,
                elements: elements
                    .iter()
                    .filter(|e| e.field_value_id == value.field_value_id)
                    .map(|e| typed(e.field_value_element_id))
                    .collect(),
            })
            .collect(),
    }
}

#[test]
fn submission_round_trips_through_merges() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let server = forms_server();
    let repository = RepositoryProvider::new(server.clone());

    rt.block_on(async {
        let submission = sample();
        let id = save_submission(&cx, &repository, &submission).await;
        assert_eq!(id, 1);
        assert_eq!(server.row_count("FieldValueElement"), 5);
        assert_eq!(server.row_count("MoneyElement"), 1);
        assert_eq!(load_submission(&cx, &repository, id).await, submission);

        // Drop the last element of the second answer and reword the text.
        let mut edited = submission.clone();
        edited.answers[0].elements[1] = Element::Text("late".into());
        edited.answers[1].elements.pop();

        let values = field_values(&cx, &repository, id).await;
        let answers: Vec<(i32, &Answer)> = values
            .iter()
            .map(|v| v.field_value_id)
            .zip(edited.answers.iter())
            .collect();
        let merged = merge_elements(&cx, &repository, &answers).await;
        assert_eq!(merged.len(), 4);

        assert_eq!(server.row_count("FieldValueElement"), 4);
        assert_eq!(server.row_count("TextElement"), 1);
        assert_eq!(load_submission(&cx, &repository, id).await, edited);
    });

    let statements = server.statements();
    assert!(statements[0].starts_with("DECLARE @NewId int\nINSERT INTO [dbo].[GenericSubmission]"));
    assert!(statements.iter().any(|sql| sql.starts_with("DECLARE @inserted [dbo].[FieldValueElementTableType];")));
}

/// Keys 1..=5 whose names sort as 2, 4, 5, 3, 1.
fn named_category_server() -> MemoryServer {
    let server = MemoryServer::new().with_identity("Category", "CategoryId");
    server.seed(
        "Category",
        ["Echo", "Alpha", "Delta", "Bravo", "Charlie"]
            .into_iter()
            .zip(1..)
            .map(|(name, id)| {
                vec![
                    ("CategoryId", Value::Int(id)),
                    ("Name", Value::Text(name.into())),
                ]
            })
            .collect(),
    );
    server
}

fn placeholders(sql: &str) -> Vec<usize> {
    Regex::new(r"@(\d+)")
        .unwrap()
        .captures_iter(sql)
        .map(|c| c[1].parse().unwrap())
        .collect()
}

#[test]
fn pages_follow_name_order() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let repository = RepositoryProvider::new(named_category_server());

    rt.block_on(async {
        let page = |number| {
            Selection::<CategoryRow>::new()
                .order_by(CategoryRow::NAME)
                .page(Page::new(3, number))
        };
        let ids = |rows: Vec<CategoryRow>| rows.iter().map(|c| c.category_id).collect::<Vec<_>>();

        let first = unwrap_outcome(repository.select_entities(&cx, &page(1)).await);
        assert_eq!(ids(first), vec![2, 4, 5]);
        let second = unwrap_outcome(repository.select_entities(&cx, &page(2)).await);
        assert_eq!(ids(second), vec![3, 1]);
        let third = unwrap_outcome(repository.select_entities(&cx, &page(3)).await);
        assert!(third.is_empty());

        let filtered = Selection::<CategoryRow>::new()
            .include(CategoryRow::CATEGORY_ID, [2, 3, 4, 5])
            .order_by_descending(CategoryRow::NAME)
            .page(Page::new(2, 2));
        let statement = repository.adapter().select_statement(&filtered).unwrap();

        let (cte, outer) = statement.sql.split_once("\n)\n").unwrap();
        assert!(cte.contains(
            "WHERE [dbo].[Category].[CategoryId] IN (@4, @5, @6, @7)\n\
             ORDER BY [dbo].[Category].[Name] DESC\n\
             OFFSET @8 ROWS FETCH NEXT @9 ROWS ONLY"
        ));
        assert!(outer.contains("AND [dbo].[Category].[CategoryId] IN (@0, @1, @2, @3)\n"));
        let inner = placeholders(cte);
        let outer = placeholders(outer);
        assert_eq!(outer, vec![0, 1, 2, 3]);
        assert_eq!(inner, (4..=9).collect::<Vec<_>>());
        assert!(outer.iter().max() < inner.iter().min());

        assert_eq!(statement.params.len(), 10);
        assert_eq!(statement.params[4], Value::Int(2));
        assert_eq!(statement.params[8], Value::BigInt(2));
        assert_eq!(statement.params[9], Value::BigInt(2));

        // Descending names of 2..=5: Delta, Charlie, Bravo, Alpha.
        let rows = unwrap_outcome(repository.select_entities(&cx, &filtered).await);
        assert_eq!(ids(rows), vec![4, 2]);
    });
}

#[test]
fn scalar_reads_and_streams() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let repository = RepositoryProvider::new(category_server());

    rt.block_on(async {
        let all = Selection::<CategoryRow>::new();
        assert_eq!(unwrap_outcome(repository.count(&cx, &all).await), 5);

        let named = |name: &str| Selection::<CategoryRow>::new().equal_to(CategoryRow::NAME, name);
        assert!(unwrap_outcome(repository.contains(&cx, &named("Category 3")).await));
        assert!(!unwrap_outcome(repository.contains(&cx, &named("Category 9")).await));

        let rows = unwrap_outcome(
            repository
                .dynamic_select(&cx, &all.clone().order_by_descending(CategoryRow::CATEGORY_ID))
                .await,
        );
        assert_eq!(rows[0].get_named::<i32>("CategoryId").unwrap(), 5);

        let stream = unwrap_outcome(repository.stream_entities(&cx, &all).await);
        assert_eq!(stream.remaining(), 5);
        let names: Vec<String> = stream.map(|c| c.unwrap().name).collect();
        assert_eq!(names[4], "Category 5");
    });
}

#[test]
fn save_updates_or_inserts_and_delete_removes() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let server = category_server();
    let repository = RepositoryProvider::new(server.clone());

    rt.block_on(async {
        let mut existing = CategoryRow {
            category_id: 3,
            name: "Renamed".into(),
        };
        unwrap_outcome(repository.save(&cx, &mut existing).await);
        let reread = unwrap_outcome(
            repository
                .first_or_default(
                    &cx,
                    &Selection::<CategoryRow>::new().equal_to(CategoryRow::CATEGORY_ID, 3),
                )
                .await,
        );
        assert_eq!(reread, Some(existing));

        let mut fresh = CategoryRow {
            category_id: 0,
            name: "Fresh".into(),
        };
        unwrap_outcome(repository.save(&cx, &mut fresh).await);
        assert_eq!(fresh.category_id, 6);
        assert_eq!(server.row_count("Category"), 6);

        assert_eq!(unwrap_outcome(repository.delete_item(&cx, &fresh).await), 1);
        let removed = unwrap_outcome(
            repository
                .delete(
                    &cx,
                    &Selection::<CategoryRow>::new().include(CategoryRow::CATEGORY_ID, [1, 2]),
                )
                .await,
        );
        assert_eq!(removed, 2);
        assert_eq!(server.row_count("Category"), 3);
    });
}

#[test]
fn rolled_back_work_is_discarded() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let server = category_server();
    let repository = RepositoryProvider::new(server.clone());
    let all = Selection::<CategoryRow>::new();

    rt.block_on(async {
        let mut tx = unwrap_outcome(repository.begin_transaction(&cx).await);
        let mut temporary = CategoryRow {
            category_id: 0,
            name: "Temporary".into(),
        };
        unwrap_outcome(tx.insert(&cx, &mut temporary).await);
        assert_eq!(unwrap_outcome(tx.count(&cx, &all).await), 6);
        unwrap_outcome(tx.rollback(&cx).await);
        assert_eq!(unwrap_outcome(repository.count(&cx, &all).await), 5);

        let mut tx = unwrap_outcome(repository.begin_transaction(&cx).await);
        let mut kept = CategoryRow {
            category_id: 0,
            name: "Kept".into(),
        };
        unwrap_outcome(tx.insert(&cx, &mut kept).await);
        unwrap_outcome(tx.savepoint(&cx, "before_extra").await);
        let mut extra = CategoryRow {
            category_id: 0,
            name: "Extra".into(),
        };
        unwrap_outcome(tx.insert(&cx, &mut extra).await);
        unwrap_outcome(tx.rollback_to(&cx, "before_extra").await);
        unwrap_outcome(tx.commit(&cx).await);
        assert_eq!(unwrap_outcome(repository.count(&cx, &all).await), 6);
    });
    assert_eq!(server.row_count("Category"), 6);
}
