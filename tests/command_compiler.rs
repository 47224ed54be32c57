mod common;

use chrono::{TimeZone, Utc};
use common::{CompositeEntity, Event, EventKind, SimpleEntity, Todo};
use rust_sqlite_repo::{
    raw_expression, Compiler, DbError, Filter, Mapper, Record, Select, TableBuilder, TextEnum,
    UnixMillis, Value, ValueConverter, Where,
};

#[test]
fn identity_key_compiles_inline_autoincrement() {
    let mapper = Mapper::default();
    let sql = Compiler::new(&mapper)
        .create_table::<SimpleEntity>()
        .unwrap();
    assert_eq!(
        sql.sql(),
        "CREATE TABLE IF NOT EXISTS `simple_table` (`id` INTEGER PRIMARY KEY AUTOINCREMENT, \
         `description` TEXT NOT NULL, `value` REAL);"
    );
    assert!(sql.args().is_empty());
}

#[test]
fn composite_key_compiles_table_level_primary_key() {
    let mapper = Mapper::default();
    let sql = Compiler::new(&mapper)
        .create_table::<CompositeEntity>()
        .unwrap();
    assert_eq!(
        sql.sql(),
        "CREATE TABLE IF NOT EXISTS `composite_table` (`key_part1` INTEGER NOT NULL, \
         `key_part2` TEXT NOT NULL, `payload` TEXT, PRIMARY KEY (`key_part1`, `key_part2`));"
    );
    assert!(!sql.sql().contains("AUTOINCREMENT"));
}

#[test]
fn table_constraints_are_appended_verbatim() {
    let mapper = Mapper::default();
    let sql = Compiler::new(&mapper)
        .create_table_with::<Todo>(&[raw_expression("CHECK (priority >= 0)")])
        .unwrap();
    assert!(sql.sql().ends_with(", CHECK (priority >= 0));"), "{}", sql.sql());
}

#[derive(Debug, Default)]
struct NoColumns;

impl Record for NoColumns {
    fn describe(t: &mut TableBuilder<'_, Self>) {
        t.name("no_columns");
    }
}

#[derive(Debug, Default)]
struct KeyLess {
    note: String,
}

impl Record for KeyLess {
    fn describe(t: &mut TableBuilder<'_, Self>) {
        t.name("key_less");
        t.field("note", |r| &r.note, |r| &mut r.note);
    }
}

#[test]
fn tables_without_columns_or_keys_are_schema_errors() {
    let mapper = Mapper::default();
    let compiler = Compiler::new(&mapper);
    assert!(matches!(
        compiler.create_table::<NoColumns>(),
        Err(DbError::Schema(_))
    ));
    assert!(matches!(
        compiler.get_by_id::<KeyLess>(1),
        Err(DbError::Schema(_))
    ));
    assert!(matches!(
        compiler.delete(&KeyLess::default()),
        Err(DbError::Schema(_))
    ));
}

#[test]
fn index_and_drop_statements() {
    let mapper = Mapper::default();
    let compiler = Compiler::new(&mapper);
    assert_eq!(
        compiler
            .create_index::<Todo>("idx_todo", true, &["title", "priority"])
            .unwrap()
            .sql(),
        "CREATE UNIQUE INDEX IF NOT EXISTS `idx_todo` ON `todos` (`todo_title`, `priority`);"
    );
    assert_eq!(
        compiler.drop_index("idx_todo").unwrap().sql(),
        "DROP INDEX IF EXISTS `idx_todo`;"
    );
    assert_eq!(
        compiler.drop_table::<Todo>().unwrap().sql(),
        "DROP TABLE IF EXISTS `todos`;"
    );
    assert!(matches!(
        compiler.create_index::<Todo>("idx; DROP", false, &["title"]),
        Err(DbError::InvalidIdentifier(_))
    ));
    assert!(matches!(
        compiler.drop_table_named("todos--"),
        Err(DbError::InvalidIdentifier(_))
    ));
    assert!(matches!(
        compiler.create_index::<Todo>("idx_empty", false, &[]),
        Err(DbError::Argument(_))
    ));
}

#[test]
fn insert_skips_identity_and_binds_values() {
    let mapper = Mapper::default();
    let todo = Todo {
        id: 99,
        title: "write tests".to_string(),
        done: true,
        priority: 2,
        due: None,
    };
    let insert = Compiler::new(&mapper).insert(&todo).unwrap();
    assert_eq!(
        insert.sql(),
        "INSERT INTO `todos` (`todo_title`, `done`, `priority`, `due`) VALUES (?, ?, ?, ?);"
    );
    assert_eq!(
        insert.args(),
        &[
            Value::from("write tests"),
            Value::Integer(1),
            Value::Integer(2),
            Value::Null,
        ]
    );
}

#[test]
fn update_sets_non_key_columns_and_matches_every_key() {
    let mapper = Mapper::default();
    let record = CompositeEntity {
        key_part1: 7,
        key_part2: "b".to_string(),
        payload: Some("x".to_string()),
    };
    let update = Compiler::new(&mapper).update(&record).unwrap();
    assert_eq!(
        update.sql(),
        "UPDATE `composite_table` SET `payload` = ? WHERE `key_part1` = ? AND `key_part2` = ?;"
    );
    assert_eq!(
        update.args(),
        &[Value::from("x"), Value::Integer(7), Value::from("b")]
    );
}

#[derive(Debug, Default)]
struct NullableKey {
    code: Option<String>,
    label: String,
}

impl Record for NullableKey {
    fn describe(t: &mut TableBuilder<'_, Self>) {
        t.name("nullable_key");
        t.field("code", |r| &r.code, |r| &mut r.code).primary_key();
        t.field("label", |r| &r.label, |r| &mut r.label);
    }
}

#[test]
fn null_key_values_are_integrity_errors() {
    let mapper = Mapper::default();
    let compiler = Compiler::new(&mapper);
    let record = NullableKey::default();
    assert!(matches!(compiler.update(&record), Err(DbError::Integrity(_))));
    assert!(matches!(compiler.delete(&record), Err(DbError::Integrity(_))));
    assert!(matches!(
        compiler.delete_by_key::<NullableKey>(&[Value::Null]),
        Err(DbError::Integrity(_))
    ));
}

#[test]
fn delete_by_key_checks_arity() {
    let mapper = Mapper::default();
    let compiler = Compiler::new(&mapper);
    assert!(matches!(
        compiler.delete_by_key::<CompositeEntity>(&[Value::Integer(1)]),
        Err(DbError::Argument(_))
    ));
    let delete = compiler
        .delete_by_key::<CompositeEntity>(&[Value::Integer(1), Value::from("a")])
        .unwrap();
    assert_eq!(
        delete.sql(),
        "DELETE FROM `composite_table` WHERE `key_part1` = ? AND `key_part2` = ?;"
    );
    assert_eq!(
        compiler.delete_all::<CompositeEntity>().unwrap().sql(),
        "DELETE FROM `composite_table`;"
    );
}

#[test]
fn get_by_id_uses_the_first_key_column_only() {
    let mapper = Mapper::default();
    let get = Compiler::new(&mapper)
        .get_by_id::<CompositeEntity>(3)
        .unwrap();
    assert_eq!(
        get.sql(),
        "SELECT * FROM `composite_table` WHERE `key_part1` = ? LIMIT 1;"
    );
    assert_eq!(get.args(), &[Value::Integer(3)]);
}

#[test]
fn select_builder_joins_predicates_explicitly() {
    let mapper = Mapper::default();
    let select = Select::<Todo>::from(&mapper)
        .unwrap()
        .columns(&["id", "title"])
        .eq("done", false)
        .ge("priority", 2)
        .or()
        .like("title", "%urgent%")
        .order_by_desc("priority")
        .order_by("id")
        .limit(10)
        .offset(20);
    let command = select.to_command().unwrap();
    assert_eq!(
        command.sql(),
        "SELECT `id`, `todo_title` FROM `todos` WHERE `done` = ? AND `priority` >= ? \
         OR `todo_title` LIKE ? ORDER BY `priority` DESC, `id` ASC LIMIT 10 OFFSET 20;"
    );
    assert_eq!(
        command.args(),
        &[Value::Integer(0), Value::Integer(2), Value::from("%urgent%")]
    );
}

#[test]
fn select_supports_grouping_aggregates_and_offset_without_limit() {
    let mapper = Mapper::default();
    let command = Select::<Event>::from(&mapper)
        .unwrap()
        .distinct()
        .columns(&["kind"])
        .aggregate(raw_expression("COUNT(*) AS total"))
        .in_list("kind", [EventKind::Created, EventKind::Updated].map(|k| k.name()))
        .group_by(&["kind"])
        .having(Filter::new().raw(raw_expression("COUNT(*) > ?"), [1]))
        .offset(5)
        .to_command()
        .unwrap();
    assert_eq!(
        command.sql(),
        "SELECT DISTINCT `kind`, COUNT(*) AS total FROM `events` WHERE `kind` IN (?, ?) \
         GROUP BY `kind` HAVING (COUNT(*) > ?) LIMIT -1 OFFSET 5;"
    );
    assert_eq!(command.args().len(), 3);
}

#[test]
fn builders_can_be_cloned_and_extended_independently() {
    let mapper = Mapper::default();
    let base = Select::<Todo>::from(&mapper).unwrap().eq("done", true);
    let narrowed = base.clone().gt("priority", 3);
    assert_eq!(
        base.to_command().unwrap().sql(),
        "SELECT * FROM `todos` WHERE `done` = ?;"
    );
    assert_eq!(narrowed.to_command().unwrap().args().len(), 2);
}

#[test]
fn raw_fragment_argument_mismatch_is_rejected() {
    let mapper = Mapper::default();
    let err = Select::<Todo>::from(&mapper)
        .unwrap()
        .raw(raw_expression("priority BETWEEN ? AND ?"), [1])
        .to_command()
        .unwrap_err();
    assert!(matches!(err, DbError::Argument(_)));
}

#[test]
fn predicate_columns_are_quoted() {
    let mapper = Mapper::default();
    let command = Select::<Todo>::from(&mapper)
        .unwrap()
        .eq("x`; DROP TABLE todos; --", 1)
        .to_command()
        .unwrap();
    assert_eq!(
        command.sql(),
        "SELECT * FROM `todos` WHERE `x``; DROP TABLE todos; --` = ?;"
    );
}

#[test]
fn predicate_arguments_take_the_column_storage_class() {
    let mapper = Mapper::default();
    let stamp = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();

    let command = Select::<Event>::from(&mapper)
        .unwrap()
        .ge("happened_at", UnixMillis.to_storage(&stamp))
        .in_list("id", ["4", "5"])
        .like("kind", "Up%")
        .to_command()
        .unwrap();
    assert_eq!(
        command.args(),
        &[
            Value::Integer(1_714_552_200_000),
            Value::Integer(4),
            Value::Integer(5),
            Value::from("Up%"),
        ]
    );

    // a timestamp's text form cannot be compared with stored milliseconds
    let select = Select::<Event>::from(&mapper).unwrap().eq("happened_at", stamp);
    assert!(matches!(select.to_command(), Err(DbError::Mapping(_))));

    let compiler = Compiler::new(&mapper);
    let delete = compiler
        .delete_where::<Event>()
        .unwrap()
        .lt("happened_at", stamp)
        .compile();
    assert!(matches!(delete, Err(DbError::Mapping(_))));

    let update = compiler
        .update_where::<Todo>()
        .unwrap()
        .set("done", true)
        .eq("priority", "7")
        .compile()
        .unwrap();
    assert_eq!(update.args(), &[Value::Integer(1), Value::Integer(7)]);
}

#[test]
fn update_and_delete_where_builders() {
    let mapper = Mapper::default();
    let compiler = Compiler::new(&mapper);

    let update = compiler
        .update_where::<Todo>()
        .unwrap()
        .set("done", true)
        .set("priority", "5")
        .lt("priority", 3)
        .compile()
        .unwrap();
    assert_eq!(
        update.sql(),
        "UPDATE `todos` SET `done` = ?, `priority` = ? WHERE `priority` < ?;"
    );
    assert_eq!(
        update.args(),
        &[Value::Integer(1), Value::Integer(5), Value::Integer(3)]
    );

    assert!(matches!(
        compiler.update_where::<Todo>().unwrap().compile(),
        Err(DbError::Mapping(_))
    ));
    assert!(matches!(
        compiler
            .update_where::<Todo>()
            .unwrap()
            .set("nope", 1)
            .compile(),
        Err(DbError::Argument(_))
    ));

    let delete = compiler
        .delete_where::<Todo>()
        .unwrap()
        .is_not_null("due")
        .compile()
        .unwrap();
    assert_eq!(delete.sql(), "DELETE FROM `todos` WHERE `due` IS NOT NULL;");
}
