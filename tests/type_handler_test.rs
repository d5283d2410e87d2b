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

//! Type handler, type map and enum mapping tests

use rowmap::driver::{MemoryConnection, ResultSet};
use rowmap::{
    impl_record, opaque_field, sql_enum, DbParameter, DbType, Error, Result, SqlMapper,
    TypeHandler, Value,
};

#[derive(Debug, Clone, Default, PartialEq)]
struct Point {
    x: i64,
    y: i64,
}

opaque_field!(Point);

struct PointHandler;

impl TypeHandler<Point> for PointHandler {
    fn set_value(&self, param: &mut DbParameter, value: &Point) -> Result<()> {
        param.value = Value::text(format!("{},{}", value.x, value.y));
        param.db_type = Some(DbType::AnsiString);
        Ok(())
    }

    fn parse(&self, value: &Value) -> Result<Point> {
        let text = value
            .as_str()
            .ok_or_else(|| Error::type_conversion(value.kind_name(), "Point"))?;
        let (x, y) = text
            .split_once(',')
            .ok_or_else(|| Error::type_conversion(text, "Point"))?;
        let parse = |s: &str| {
            s.trim()
                .parse::<i64>()
                .map_err(|_| Error::type_conversion(s, "i64"))
        };
        Ok(Point {
            x: parse(x)?,
            y: parse(y)?,
        })
    }
}

#[derive(Debug, Default, PartialEq)]
struct Place {
    name: String,
    location: Point,
    previous: Option<Point>,
}

impl_record!(Place {
    name as "Name",
    location as "Location",
    previous as "Previous"
});

sql_enum! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    enum Status: i32 {
        #[default]
        Active = 1,
        Suspended = 2,
    }
}

#[derive(Debug, Default, PartialEq)]
struct Account {
    id: i64,
    status: Status,
}

impl_record!(Account { id as "Id", status as "Status" });

fn places() -> MemoryConnection {
    MemoryConnection::returning(vec![ResultSet::new(["Name", "Location", "Previous"])
        .with_row(vec![Value::text("home"), Value::text("3,4"), Value::Null])])
}

#[test]
fn test_handler_binds_and_reads_members() {
    let mapper = SqlMapper::default();
    mapper.add_type_handler::<Point, _>(PointHandler);

    let mut conn = places();
    let stats = conn.stats();
    let place = Place {
        name: "home".to_string(),
        location: Point { x: 3, y: 4 },
        previous: None,
    };
    mapper
        .execute(
            &mut conn,
            "insert into places values (@Name, @Location, @Previous)",
            &place,
        )
        .unwrap();

    let executed = stats.last_executed().unwrap();
    let location = executed.parameters.iter().find(|p| p.name == "Location").unwrap();
    assert_eq!(location.value, Value::text("3,4"));
    assert_eq!(location.db_type, Some(DbType::AnsiString));
    // A null wrapper never reaches the handler
    let previous = executed.parameters.iter().find(|p| p.name == "Previous").unwrap();
    assert_eq!(previous.value, Value::Null);
    assert_eq!(previous.db_type, None);

    let rows: Vec<Place> = mapper.query(&mut conn, "select * from places", &()).unwrap();
    assert_eq!(rows, vec![place]);
}

#[test]
fn test_handler_reads_scalars() {
    let mapper = SqlMapper::default();
    mapper.add_type_handler::<Point, _>(PointHandler);
    let mut conn = MemoryConnection::returning(vec![ResultSet::new(["p"]).with_rows(vec![
        vec![Value::text("1,2")],
        vec![Value::text("5,6")],
    ])]);

    let points: Vec<Point> = mapper.query(&mut conn, "select p from t", &()).unwrap();
    assert_eq!(points, vec![Point { x: 1, y: 2 }, Point { x: 5, y: 6 }]);

    let first: Point = mapper.execute_scalar(&mut conn, "select p from t", &()).unwrap();
    assert_eq!(first, Point { x: 1, y: 2 });

    let maybe: Vec<Option<Point>> = mapper.query(&mut conn, "select p from t", &()).unwrap();
    assert_eq!(maybe[1], Some(Point { x: 5, y: 6 }));
}

#[test]
fn test_handler_errors_name_the_column() {
    let mapper = SqlMapper::default();
    mapper.add_type_handler::<Point, _>(PointHandler);
    let mut conn = MemoryConnection::returning(vec![ResultSet::new(["Name", "Location"])
        .with_row(vec![Value::text("x"), Value::text("nowhere")])]);

    let err = mapper
        .query::<Place, _>(&mut conn, "select * from places", &())
        .unwrap_err();
    assert!(matches!(err, Error::ColumnConversion { ordinal: 1, ref column, .. } if column == "Location"));
    assert!(matches!(err.root(), Error::TypeConversion { .. }));
}

#[test]
fn test_removed_handler_recompiles_as_unsupported() {
    let mapper = SqlMapper::default();
    mapper.add_type_handler::<Point, _>(PointHandler);
    let mut conn = places();
    let sql = "insert into places values (@Name, @Location, @Previous)";

    mapper.execute(&mut conn, sql, &Place::default()).unwrap();
    assert_eq!(mapper.cached_sql_count(), 1);

    mapper.remove_type_handler::<Point>();
    assert_eq!(mapper.cached_sql_count(), 0);
    let err = mapper.execute(&mut conn, sql, &Place::default()).unwrap_err();
    assert!(matches!(err, Error::UnsupportedType { ref member, .. } if member == "Location"));

    mapper.add_type_handler::<Point, _>(PointHandler);
    mapper.execute(&mut conn, sql, &Place::default()).unwrap();
    mapper.reset_type_handlers();
    assert!(mapper.execute(&mut conn, sql, &Place::default()).is_err());
}

#[test]
fn test_coercion_table_wins_over_handlers() {
    struct ShoutingHandler;

    impl TypeHandler<String> for ShoutingHandler {
        fn set_value(&self, param: &mut DbParameter, value: &String) -> Result<()> {
            param.value = Value::text(value.to_uppercase());
            Ok(())
        }

        fn parse(&self, value: &Value) -> Result<String> {
            Ok(value.as_str().unwrap_or_default().to_uppercase())
        }
    }

    let mapper = SqlMapper::default();
    mapper.add_type_handler::<String, _>(ShoutingHandler);
    let mut conn = MemoryConnection::new(|cmd| {
        let name = cmd.param("Name").cloned().unwrap_or(Value::Null);
        Ok(vec![ResultSet::new(["Name", "Location"]).with_row(vec![name, Value::Null])])
    });
    mapper.add_type_handler::<Point, _>(PointHandler);

    let place = Place {
        name: "quiet".to_string(),
        ..Default::default()
    };
    let rows: Vec<Place> = mapper
        .query(&mut conn, "select @Name as Name, null as Location", &place)
        .unwrap();
    assert_eq!(rows[0].name, "quiet");
}

#[test]
fn test_type_map_overrides_wire_kind() {
    let mapper = SqlMapper::default();
    let mut conn = MemoryConnection::returning(vec![ResultSet::affected(1)]);
    let stats = conn.stats();
    let account = Account {
        id: 7,
        status: Status::Active,
    };
    let sql = "update accounts set status = @Status where id = @Id";

    mapper.execute(&mut conn, sql, &account).unwrap();
    let id = stats.last_executed().unwrap().parameters[0].clone();
    assert_eq!(id.db_type, Some(DbType::Int64));

    mapper.add_type_map::<i64>(DbType::Decimal);
    mapper.execute(&mut conn, sql, &account).unwrap();
    let id = stats.last_executed().unwrap().parameters[0].clone();
    assert_eq!(id.db_type, Some(DbType::Decimal));
}

#[test]
fn test_enums_bind_as_underlying_integer() {
    let mapper = SqlMapper::default();
    let mut conn = MemoryConnection::returning(vec![ResultSet::affected(1)]);
    let stats = conn.stats();

    mapper
        .execute(
            &mut conn,
            "update accounts set status = @Status where id = @Id",
            &Account {
                id: 1,
                status: Status::Suspended,
            },
        )
        .unwrap();

    let status = stats.last_executed().unwrap().parameters[1].clone();
    assert_eq!(status.name, "Status");
    assert_eq!(status.value, Value::Integer(2));
    assert_eq!(status.db_type, Some(DbType::Int32));
}

#[test]
fn test_enums_read_from_numbers_and_names() {
    let mapper = SqlMapper::default();
    let mut conn = MemoryConnection::returning(vec![ResultSet::new(["Id", "Status"]).with_rows(vec![
        vec![Value::Integer(1), Value::Integer(2)],
        vec![Value::Integer(2), Value::text("active")],
        vec![Value::Integer(3), Value::Float(2.0)],
        vec![Value::Integer(4), Value::Null],
    ])]);

    let accounts: Vec<Account> = mapper.query(&mut conn, "select * from accounts", &()).unwrap();
    let statuses: Vec<Status> = accounts.iter().map(|a| a.status).collect();
    assert_eq!(
        statuses,
        vec![Status::Suspended, Status::Active, Status::Suspended, Status::Active]
    );

    let mut bad = MemoryConnection::returning(vec![ResultSet::new(["Id", "Status"])
        .with_row(vec![Value::Integer(1), Value::Integer(9)])]);
    let err = mapper
        .query::<Account, _>(&mut bad, "select * from accounts", &())
        .unwrap_err();
    assert!(err.is_conversion());
}
