// Copyright 2025 Rowmap Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Integration tests for single-shape queries and executes

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rowmap::driver::{MemoryConnection, ResultSet};
use rowmap::{
    impl_record, CommandDefinition, Connection, ConnectionState, DataReader, Error, MapperConfig,
    SqlMapper, Value,
};

#[derive(Debug, Clone, Default, PartialEq)]
struct Product {
    id: i64,
    name: String,
    price: f64,
    note: Option<String>,
}

impl_record!(Product {
    id as "Id",
    name as "Name",
    price as "Price",
    note as "Note"
});

#[derive(Debug, Default)]
struct IdList {
    ids: Vec<i64>,
}

impl_record!(IdList { ids as "Ids" });

fn product_columns() -> ResultSet {
    ResultSet::new(["Id", "Name", "Price", "Note"])
}

#[test]
fn test_bind_then_read_round_trips() {
    let mapper = SqlMapper::default();
    let original = Product {
        id: 7,
        name: "widget".to_string(),
        price: 2.5,
        note: None,
    };

    // Echo the bound parameters back as one row with matching columns
    let mut conn = MemoryConnection::new(|cmd| {
        let row = ["Id", "Name", "Price", "Note"]
            .iter()
            .map(|n| cmd.param(n).cloned().unwrap_or(Value::Null))
            .collect();
        Ok(vec![product_columns().with_row(row)])
    });

    let sql = "select @Id as Id, @Name as Name, @Price as Price, @Note as Note";
    let rows: Vec<Product> = mapper.query(&mut conn, sql, &original).unwrap();
    assert_eq!(rows, vec![original]);
}

#[test]
fn test_null_columns_map_to_zero_values() {
    let mapper = SqlMapper::default();
    let mut conn = MemoryConnection::returning(vec![product_columns().with_row(vec![
        Value::Integer(1),
        Value::Null,
        Value::Null,
        Value::Null,
    ])]);

    let rows: Vec<Product> = mapper.query(&mut conn, "select * from products", &()).unwrap();
    assert_eq!(
        rows,
        vec![Product {
            id: 1,
            ..Default::default()
        }]
    );
}

#[test]
fn test_column_drift_rebuilds_deserializer() {
    let mapper = SqlMapper::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let mut conn = MemoryConnection::new(move |_| {
        let set = if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            ResultSet::new(["Id", "Name"]).with_row(vec![Value::Integer(1), Value::text("a")])
        } else {
            // Same SQL, columns reordered: a stale plan would read "b" into Id
            ResultSet::new(["Name", "Id"]).with_row(vec![Value::text("b"), Value::Integer(2)])
        };
        Ok(vec![set])
    });

    let first: Vec<Product> = mapper.query(&mut conn, "select * from products", &()).unwrap();
    let second: Vec<Product> = mapper.query(&mut conn, "select * from products", &()).unwrap();

    assert_eq!((first[0].id, first[0].name.as_str()), (1, "a"));
    assert_eq!((second[0].id, second[0].name.as_str()), (2, "b"));
    assert_eq!(mapper.cached_sql_count(), 1);
}

#[test]
fn test_conversion_error_names_the_column() {
    let mapper = SqlMapper::default();
    let mut conn = MemoryConnection::returning(vec![ResultSet::new(["Id", "Price"])
        .with_row(vec![Value::Integer(1), Value::text("cheap")])]);
    let stats = conn.stats();

    let err = mapper
        .query::<Product, _>(&mut conn, "select Id, Price from products", &())
        .unwrap_err();
    match err {
        Error::ColumnConversion { column, .. } => assert_eq!(column, "Price"),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert_eq!(stats.commands_disposed(), 1);
}

#[test]
fn test_scalar_queries() {
    let mapper = SqlMapper::default();
    let mut conn = MemoryConnection::returning(vec![ResultSet::new(["n"]).with_rows(vec![
        vec![Value::Integer(3)],
        vec![Value::Integer(4)],
    ])]);

    let values: Vec<i32> = mapper.query(&mut conn, "select n from t", &()).unwrap();
    assert_eq!(values, vec![3, 4]);

    let first: i64 = mapper.execute_scalar(&mut conn, "select n from t", &()).unwrap();
    assert_eq!(first, 3);
}

#[test]
fn test_result_without_columns_is_empty() {
    let mapper = SqlMapper::default();
    let mut conn = MemoryConnection::returning(vec![ResultSet::affected(5)]);
    let rows: Vec<Product> = mapper.query(&mut conn, "update products set price = 0", &()).unwrap();
    assert!(rows.is_empty());
    assert_eq!(conn.state(), ConnectionState::Closed);
}

#[test]
fn test_empty_list_returns_no_rows() {
    let mapper = SqlMapper::default();
    let mut conn = MemoryConnection::new(|cmd| {
        assert_eq!(
            cmd.text,
            "select * from products where Id in (SELECT @Ids WHERE 1 = 0)"
        );
        assert_eq!(cmd.param("Ids"), Some(&Value::Null));
        Ok(vec![product_columns()])
    });

    let rows: Vec<Product> = mapper
        .query(
            &mut conn,
            "select * from products where Id in @Ids",
            &IdList { ids: vec![] },
        )
        .unwrap();
    assert!(rows.is_empty());
}

#[test]
fn test_execute_many_restores_text_between_items() {
    let mapper = SqlMapper::default();
    let mut conn = MemoryConnection::returning(vec![ResultSet::affected(1)]);
    let stats = conn.stats();

    let items = [
        IdList { ids: vec![1, 2] },
        IdList { ids: vec![3] },
    ];
    let affected = mapper
        .execute_many(&mut conn, "delete from products where Id in @Ids", &items)
        .unwrap();
    assert_eq!(affected, 2);

    let executed = stats.executed();
    assert_eq!(executed.len(), 2);
    assert_eq!(executed[0].text, "delete from products where Id in (@Ids1,@Ids2)");
    assert_eq!(executed[0].param_names(), vec!["Ids1", "Ids2"]);
    assert_eq!(executed[1].text, "delete from products where Id in (@Ids1)");
    assert_eq!(executed[1].param_names(), vec!["Ids1"]);
    assert_eq!(stats.commands_created(), 1);
    assert_eq!(stats.commands_disposed(), 1);
    assert_eq!(stats.opens(), 1);
}

#[test]
fn test_execute_reader_owns_connection_close() {
    let mapper = SqlMapper::default();
    let mut conn = MemoryConnection::returning(vec![product_columns().with_row(vec![
        Value::Integer(1),
        Value::text("a"),
        Value::Float(1.0),
        Value::Null,
    ])]);
    let stats = conn.stats();

    {
        let mut reader = mapper
            .execute_reader(&mut conn, "select * from products", &())
            .unwrap();
        assert_eq!(reader.field_count(), 4);
        assert_eq!(reader.name(1), "Name");
        assert!(reader.read().unwrap());
        assert_eq!(reader.get_value(1).unwrap(), Value::text("a"));
        assert_eq!(stats.closes(), 0);
    }
    assert_eq!(stats.closes(), 1);
    assert_eq!(stats.commands_disposed(), 1);
    assert_eq!(conn.state(), ConnectionState::Closed);
}

#[test]
fn test_streaming_query_through_configured_default() {
    let mapper = SqlMapper::new(MapperConfig::default().with_buffered(false));
    let mut conn = MemoryConnection::returning(vec![ResultSet::new(["n"]).with_rows(vec![
        vec![Value::Integer(1)],
        vec![Value::Integer(2)],
    ])]);
    let stats = conn.stats();

    let rows = mapper.query_rows::<i64, _>(&mut conn, "select n from t", &()).unwrap();
    assert!(!rows.is_buffered());
    let values: Vec<i64> = rows.collect::<rowmap::Result<_>>().unwrap();
    assert_eq!(values, vec![1, 2]);
    assert_eq!(stats.closes(), 1);
    assert_eq!(stats.cancels(), 0);

    // An explicit definition overrides the configured default
    let rows = mapper
        .query_rows::<i64, _>(&mut conn, CommandDefinition::new("select n from t"), &())
        .unwrap();
    assert!(rows.is_buffered());
}

#[test]
fn test_timeout_and_kind_reach_the_driver() {
    let mapper = SqlMapper::default();
    let mut conn = MemoryConnection::returning(vec![ResultSet::affected(0)]);
    let stats = conn.stats();

    let def = CommandDefinition::procedure("sp_cleanup")
        .with_timeout(std::time::Duration::from_secs(30));
    mapper.execute(&mut conn, def, &()).unwrap();

    let executed = stats.last_executed().unwrap();
    assert_eq!(executed.kind, rowmap::CommandKind::StoredProcedure);
    assert_eq!(executed.timeout, Some(std::time::Duration::from_secs(30)));
}

#[test]
fn test_connection_methods_use_the_shared_mapper() {
    use rowmap::ConnectionExt;

    let mut conn = MemoryConnection::returning(vec![product_columns().with_row(vec![
        Value::Integer(3),
        Value::text("bolt"),
        Value::Float(0.25),
        Value::Null,
    ])]);
    let stats = conn.stats();

    let products: Vec<Product> = conn
        .query("select Id, Name, Price, Note from products /* ext */", &())
        .unwrap();
    assert_eq!(products[0].name, "bolt");
    assert_eq!(products[0].note, None);

    let id: i64 = conn
        .execute_scalar("select Id from products /* ext */", &())
        .unwrap();
    assert_eq!(id, 3);
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert_eq!(stats.opens(), 2);
    assert_eq!(stats.closes(), 2);
    assert!(SqlMapper::global().cached_sql_count() >= 2);
}
