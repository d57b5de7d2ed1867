//! Schema changes and transaction control through executors

mod common;

use common::*;
use keel_exec::{
    DmlBody, Error, Expression, FieldDef, OutputItem, Statement, StatementType,
    TransactionCommand, TransactionOptions, bridge::NULL_STRING_MARK,
};
use keel_message::FormatBuilder;
use keel_store::{AddColumn, CreateTable, DropTable, Insert, Scan};
use keel_value::{DataType, Value};
use std::sync::Arc;

fn add_column(ctx: &TestContext, field: FieldDef) -> Statement {
    Statement::ddl(
        "ALTER TABLE PEOPLE ADD ...",
        Arc::new(AddColumn {
            store: ctx.store.clone(),
            table: PEOPLE.to_string(),
            field,
        }),
    )
}

#[test]
fn test_old_records_read_defaults_of_added_fields() {
    let mut ctx = TestContext::new();
    ctx.create_people(2);

    ctx.begin();
    ctx.exec(add_column(
        &ctx,
        FieldDef::new("STATUS", DataType::Text).with_default(Value::from("new")),
    ))
    .unwrap();
    ctx.exec(add_column(&ctx, FieldDef::new("NOTE", DataType::Text)))
        .unwrap();
    ctx.exec(Statement::dml(
        StatementType::Insert,
        "INSERT INTO PEOPLE (ID, STATUS) VALUES (3, 'old')",
        DmlBody::command(Arc::new(Insert::new(
            &ctx.store,
            PEOPLE,
            vec![
                (0, Expression::Literal(Value::I32(3))),
                (2, Expression::Literal(Value::from("old"))),
            ],
        ))),
    ))
    .unwrap();
    ctx.commit();

    ctx.begin();
    let select = Statement::dml(
        StatementType::Select,
        "SELECT ID, STATUS, NOTE FROM PEOPLE",
        DmlBody::query(
            Arc::new(Scan::new(&ctx.store, PEOPLE)),
            vec![
                OutputItem::field(0, 0),
                OutputItem::field(0, 2),
                OutputItem::field(0, 3),
            ],
        ),
    );
    let format = FormatBuilder::new().long(0).varying(8).varying(8).build().unwrap();
    let rows = ctx.query(select, &format).unwrap();
    assert_eq!(
        rows,
        vec![
            vec![Value::I32(1), Value::from("new"), Value::Null],
            vec![Value::I32(2), Value::from("new"), Value::Null],
            vec![Value::I32(3), Value::from("old"), Value::Null],
        ]
    );
}

#[test]
fn test_failed_ddl_changes_nothing() {
    let mut ctx = TestContext::new();
    ctx.create_people(1);
    ctx.begin();

    let duplicate = Statement::ddl(
        "CREATE TABLE PEOPLE (ID INTEGER)",
        Arc::new(CreateTable {
            store: ctx.store.clone(),
            name: PEOPLE.to_string(),
            fields: vec![FieldDef::new("ID", DataType::Integer)],
        }),
    );
    assert_eq!(
        ctx.exec(duplicate),
        Err(Error::Execution("Table PEOPLE already exists".to_string()))
    );

    ctx.exec(Statement::ddl(
        "DROP TABLE PEOPLE",
        Arc::new(DropTable {
            store: ctx.store.clone(),
            name: PEOPLE.to_string(),
        }),
    ))
    .unwrap();
    assert!(ctx.store.table_names().is_empty());

    ctx.rollback();
    assert_eq!(ctx.store.table_names(), vec![PEOPLE.to_string()]);
}

#[test]
fn test_not_null_field_rejects_null() {
    let mut ctx = TestContext::new();
    ctx.create_people(0);
    ctx.begin();

    let statement = Statement::dml(
        StatementType::Insert,
        "INSERT INTO PEOPLE (NAME) VALUES ('nobody')",
        DmlBody::command(Arc::new(Insert::new(
            &ctx.store,
            PEOPLE,
            vec![(1, Expression::Literal(Value::from("nobody")))],
        ))),
    );
    assert_eq!(
        ctx.exec(statement),
        Err(Error::Validation {
            item: "PEOPLE.ID".to_string(),
            value: NULL_STRING_MARK.to_string(),
        })
    );
}

#[test]
fn test_transaction_statements_drive_the_store() {
    let mut ctx = TestContext::new();
    ctx.create_people(0);

    ctx.exec(Statement::transaction(
        "SET TRANSACTION READ COMMITTED READ CONSISTENCY",
        TransactionCommand::Start(TransactionOptions::read_committed()),
    ))
    .unwrap();
    ctx.exec(insert_person(&ctx.store, 1, "kept")).unwrap();
    ctx.exec(Statement::transaction(
        "SAVEPOINT S1",
        TransactionCommand::Savepoint("S1".to_string()),
    ))
    .unwrap();
    ctx.exec(insert_person(&ctx.store, 2, "dropped")).unwrap();
    ctx.exec(Statement::transaction(
        "ROLLBACK TO SAVEPOINT S1",
        TransactionCommand::RollbackToSavepoint("S1".to_string()),
    ))
    .unwrap();
    ctx.exec(Statement::transaction("COMMIT", TransactionCommand::Commit))
        .unwrap();
    assert!(ctx.txn.is_none());
    assert_eq!(ctx.store.active_transactions(), 0);

    ctx.begin();
    let rows = ctx.query(select_people(&ctx.store), &people_format()).unwrap();
    assert_eq!(rows, vec![person(1, "kept")]);
}
