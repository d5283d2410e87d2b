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

//! Parameter Binding Tests
//!
//! Record, dynamic and map parameter bags bound through the mapper

use std::collections::HashMap;

use rowmap::driver::{MemoryConnection, ResultSet};
use rowmap::{
    impl_record, opaque_field, DbString, DbType, DynamicParameters, Error, MapperConfig,
    ParameterDirection, SqlMapper, Value,
};

#[derive(Debug, Default)]
struct Filter {
    name: String,
    region: i32,
    ids: Vec<i64>,
    code: DbString,
}

impl_record!(Filter {
    name as "Name",
    region as "Region",
    ids as "Ids",
    code as "Code"
});

#[derive(Debug, Default)]
struct User {
    id: i64,
    name: String,
}

impl_record!(User { id as "Id", name as "Name" });

fn affected() -> MemoryConnection {
    MemoryConnection::returning(vec![ResultSet::affected(1)])
}

#[test]
fn test_record_members_bind_by_reference() {
    let mapper = SqlMapper::default();
    let mut conn = affected();
    let stats = conn.stats();

    let filter = Filter {
        name: "ann".to_string(),
        region: 4,
        ids: vec![10, 20],
        code: DbString::new("AB").ansi().with_length(2),
    };
    mapper
        .execute(
            &mut conn,
            "update t set x = 1 where name = @Name and region = {=Region} and id in @Ids and code = @Code",
            &filter,
        )
        .unwrap();

    let executed = stats.last_executed().unwrap();
    assert_eq!(
        executed.text,
        "update t set x = 1 where name = @Name and region = 4 and id in (@Ids1,@Ids2) and code = @Code"
    );
    assert_eq!(executed.param_names(), vec!["Code", "Ids1", "Ids2", "Name"]);

    let code = &executed.parameters[0];
    assert_eq!(code.db_type, Some(DbType::AnsiString));
    assert_eq!(code.size, Some(2));
    assert_eq!(executed.param("Ids2"), Some(&Value::Integer(20)));
}

#[test]
fn test_positional_sql_keeps_every_member() {
    let mapper = SqlMapper::default();
    let mut conn = affected();
    let stats = conn.stats();

    let user = User {
        id: 1,
        name: "ann".to_string(),
    };
    mapper
        .execute(&mut conn, "insert into users values (?, ?)", &user)
        .unwrap();
    assert_eq!(stats.last_executed().unwrap().param_names(), vec!["Id", "Name"]);
}

#[test]
fn test_dynamic_template_with_extra_values() {
    let mapper = SqlMapper::default();
    let mut conn = affected();
    let stats = conn.stats();

    let mut params = DynamicParameters::from_template(User {
        id: 3,
        name: "cy".to_string(),
    });
    params.add("@Name", "override").add("limit", 10);

    mapper
        .execute(&mut conn, "update users set name = @Name where id = @Id limit @limit", &params)
        .unwrap();

    let executed = stats.last_executed().unwrap();
    assert_eq!(executed.param_names(), vec!["Id", "Name", "limit"]);
    assert_eq!(executed.param("Name"), Some(&Value::text("override")));
    assert_eq!(executed.param("Id"), Some(&Value::Integer(3)));
}

#[test]
fn test_map_parameters() {
    let mapper = SqlMapper::default();
    let mut conn = affected();
    let stats = conn.stats();

    let mut values = HashMap::new();
    values.insert("status".to_string(), Value::text("open"));
    values.insert("ids".to_string(), Value::array(vec![Value::Integer(1)]));

    mapper
        .execute(
            &mut conn,
            "update t set status = @status where id in @ids",
            &values,
        )
        .unwrap();

    let executed = stats.last_executed().unwrap();
    assert_eq!(executed.text, "update t set status = @status where id in (@ids1)");
    assert_eq!(executed.param_names(), vec!["ids1", "status"]);
}

#[test]
fn test_array_capable_connection_skips_expansion() {
    let mapper = SqlMapper::default();
    let mut conn = affected().with_array_support();
    let stats = conn.stats();

    let filter = Filter {
        ids: vec![1, 2, 3],
        ..Default::default()
    };
    mapper
        .execute(&mut conn, "delete from t where id = any(@Ids)", &filter)
        .unwrap();

    let executed = stats.last_executed().unwrap();
    assert_eq!(executed.text, "delete from t where id = any(@Ids)");
    assert_eq!(
        executed.param("Ids"),
        Some(&Value::array(vec![
            Value::Integer(1),
            Value::Integer(2),
            Value::Integer(3)
        ]))
    );
}

#[test]
fn test_same_sql_on_another_connection_string_compiles_separately() {
    let mapper = SqlMapper::default();
    let mut plain = affected();
    let mut arrays = affected()
        .with_array_support()
        .with_connection_string("memory://arrays");
    let filter = Filter {
        ids: vec![1, 2],
        ..Default::default()
    };
    let sql = "delete from t where id in @Ids";

    mapper.execute(&mut plain, sql, &filter).unwrap();
    mapper.execute(&mut arrays, sql, &filter).unwrap();

    assert_eq!(
        plain.stats().last_executed().unwrap().text,
        "delete from t where id in (@Ids1,@Ids2)"
    );
    assert_eq!(
        arrays.stats().last_executed().unwrap().text,
        "delete from t where id in @Ids"
    );
    assert_eq!(mapper.cached_sql_count(), 2);
}

#[test]
fn test_output_parameters_read_back() {
    let mapper = SqlMapper::default();
    let mut conn = MemoryConnection::returning(vec![ResultSet::affected(1)
        .with_output("total", Value::Integer(42))
        .with_output("id", Value::Integer(99))]);

    let mut params = DynamicParameters::new();
    params
        .add("id", 5)
        .add_with("total", Value::Null, Some(DbType::Int32), ParameterDirection::Output, None);

    mapper
        .execute(&mut conn, rowmap::CommandDefinition::procedure("sp_total"), &params)
        .unwrap();

    assert_eq!(params.get::<i32>("total").unwrap(), 42);
    // Input parameters are never overwritten by the driver
    assert_eq!(params.get::<i64>("id").unwrap(), 5);
}

#[test]
fn test_unsupported_member_fails_before_opening() {
    #[derive(Debug, Default, Clone, PartialEq)]
    struct Blob;
    opaque_field!(Blob);

    #[derive(Debug, Default)]
    struct Upload {
        blob: Blob,
    }
    impl_record!(Upload { blob as "Blob" });

    let mapper = SqlMapper::default();
    let mut conn = affected();
    let stats = conn.stats();

    let err = mapper
        .execute(&mut conn, "insert into files values (@Blob)", &Upload::default())
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedType { ref member, .. } if member == "Blob"));
    assert!(err.is_fatal_configuration());
    assert_eq!(stats.opens(), 0);
    assert_eq!(stats.commands_created(), 0);
}

#[test]
fn test_failed_compilation_is_not_cached() {
    #[derive(Debug, Default, Clone, PartialEq)]
    struct Shape;
    opaque_field!(Shape);

    #[derive(Debug, Default)]
    struct Drawing {
        shape: Shape,
    }
    impl_record!(Drawing { shape as "Shape" });

    let mapper = SqlMapper::default();
    let mut conn = affected();
    assert!(mapper
        .execute(&mut conn, "insert into drawings values (@Shape)", &Drawing::default())
        .is_err());
    assert_eq!(mapper.cached_sql_count(), 0);
}

#[test]
fn test_db_string_follows_configured_string_size() {
    let mapper = SqlMapper::new(MapperConfig::default().with_default_string_size(100));
    let mut conn = affected();
    let stats = conn.stats();

    let long = "x".repeat(200);
    let filter = Filter {
        name: long.clone(),
        code: DbString::new(long),
        ..Default::default()
    };
    mapper
        .execute(&mut conn, "update t set code = @Code where name = @Name", &filter)
        .unwrap();
    let executed = stats.last_executed().unwrap();
    let size_of = |name: &str| {
        executed
            .parameters
            .iter()
            .find(|p| p.name == name)
            .and_then(|p| p.size)
    };
    assert_eq!(size_of("Name"), Some(-1));
    assert_eq!(size_of("Code"), Some(-1));

    let mut params = DynamicParameters::new();
    params.add_custom("code", DbString::new("short"));
    mapper
        .execute(&mut conn, "update t set code = @code", &params)
        .unwrap();
    let code = stats.last_executed().unwrap().parameters[0].clone();
    assert_eq!(code.size, Some(100));
}
