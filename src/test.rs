//! Whole-engine scenarios driven through the SQL surface.

use crate::value::ColumnValue;
use crate::{Database, ExecutionResult, DB};
use std::path::Path;

fn open(path: &Path) -> DB {
    let _ = env_logger::builder().is_test(true).try_init();
    Database::open(path).unwrap()
}

/// Run a statement that must succeed.
fn q(db: &DB, sql: &str) -> ExecutionResult {
    let res = db.exec(sql);
    assert_eq!(res.code, 0, "statement failed: {sql}\n  -> {}", res.message);
    res
}

fn int(v: &ColumnValue) -> i64 {
    v.int().unwrap()
}

fn dbl(v: &ColumnValue) -> f64 {
    v.double().unwrap()
}

fn seed_employees(db: &DB) {
    q(
        db,
        "CREATE TABLE employees (id SERIAL PRIMKEY, name VARCHAR(30) NOT NULL, \
         department VARCHAR(20), age INT, salary DOUBLE, is_active BOOL);",
    );
    let rows = [
        ("alice", "Engineering", 34, 95000.0, true),
        ("bob", "Engineering", 28, 72000.0, true),
        ("carol", "HR", 45, 61000.0, true),
        ("dave", "HR", 38, 58000.0, false),
        ("erin", "Sales", 29, 67000.0, true),
        ("frank", "Sales", 51, 83000.0, true),
        ("grace", "Engineering", 22, 55000.0, true),
        ("heidi", "Finance", 41, 77000.0, true),
        ("ivan", "Finance", 26, 54000.0, false),
        ("judy", "Sales", 33, 69000.0, true),
        ("kevin", "HR", 57, 64000.0, true),
        ("laura", "Engineering", 30, 88000.0, false),
        ("mallory", "Finance", 36, 71000.0, true),
        ("nick", "Sales", 24, 52000.0, true),
        ("olive", "Engineering", 48, 102000.0, true),
    ];
    for (name, dept, age, salary, active) in rows {
        q(
            db,
            &format!(
                "INSERT INTO employees (name, department, age, salary, is_active) \
                 VALUES ('{name}', '{dept}', {age}, {salary}, {active});"
            ),
        );
    }
}

#[test]
fn serial_primary_key_and_returning() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    q(
        &db,
        "CREATE TABLE t (id SERIAL PRIMKEY, name VARCHAR(20) NOT NULL);",
    );
    let res = q(&db, "INSERT INTO t (name) VALUES ('alice'), ('bob') RETURNING id;");
    assert_eq!(res.rows.len(), 2);
    assert_eq!(int(&res.rows[0][0]), 1);
    assert_eq!(int(&res.rows[1][0]), 2);
    let res = q(&db, "SELECT id, name FROM t ORDER BY id;");
    assert_eq!(res.aliases, vec!["id", "name"]);
    assert_eq!(int(&res.rows[0][0]), 1);
    assert_eq!(res.rows[0][1], ColumnValue::Str("alice".into()));
    assert_eq!(int(&res.rows[1][0]), 2);
    assert_eq!(res.rows[1][1], ColumnValue::Str("bob".into()));
}

#[test]
fn limit_and_offset() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    seed_employees(&db);
    let res = q(&db, "SELECT * FROM employees LIM 3;");
    assert_eq!(res.rows.len(), 3);
    let res = q(&db, "SELECT * FROM employees WHERE salary > 70000 LIM 2;");
    assert_eq!(res.rows.len(), 2);
    for row in &res.rows {
        assert!(dbl(&row[4]) > 70000.0);
    }
    let all = q(&db, "SELECT id FROM employees ORDER BY id;");
    let page = q(&db, "SELECT id FROM employees ORDER BY id LIM 5 OFF 5;");
    assert_eq!(page.rows.len(), 5);
    assert_eq!(int(&page.rows[0][0]), int(&all.rows[5][0]));
}

#[test]
fn update_by_key_and_compound_update() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    seed_employees(&db);
    let res = q(&db, "UPDATE employees SET salary = 80000 WHERE id = 1;");
    assert_eq!(res.message, "UPDATE 1");
    let res = q(&db, "SELECT salary FROM employees WHERE id = 1;");
    assert_eq!(dbl(&res.rows[0][0]), 80000.0);

    // grace: (22, 55000, true) -> (23, 60500, true)
    q(
        &db,
        "UPDATE employees SET age = age + 1, salary = salary * 1.1 \
         WHERE age < 30 AND is_active = true;",
    );
    let res = q(&db, "SELECT age, salary FROM employees WHERE name = 'grace';");
    assert_eq!(int(&res.rows[0][0]), 23);
    assert!((dbl(&res.rows[0][1]) - 60500.0).abs() < 1e-6);
    // dave is inactive and stays untouched.
    let res = q(&db, "SELECT age FROM employees WHERE name = 'dave';");
    assert_eq!(int(&res.rows[0][0]), 38);
}

#[test]
fn delete_by_predicate_then_all() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    seed_employees(&db);
    q(&db, "DELETE FROM employees WHERE department = 'HR';");
    let res = q(
        &db,
        "SELECT COUNT(*) FROM employees WHERE department = 'HR';",
    );
    assert_eq!(int(&res.rows[0][0]), 0);
    let res = q(&db, "SELECT COUNT(*) FROM employees;");
    assert_eq!(int(&res.rows[0][0]), 12);
    q(&db, "DELETE FROM employees;");
    let res = q(&db, "SELECT * FROM employees;");
    assert_eq!(res.rows.len(), 0);
}

#[test]
fn on_delete_cascade() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    q(&db, "CREATE TABLE parent (id INT PRIMKEY);");
    q(
        &db,
        "CREATE TABLE child (pid INT FOREIGN KEY REFERENCES parent(id) ON DELETE CASCADE);",
    );
    q(&db, "INSERT INTO parent VALUES (1);");
    q(&db, "INSERT INTO child VALUES (1), (1);");
    q(&db, "DELETE FROM parent WHERE id = 1;");
    let res = q(&db, "SELECT COUNT(*) FROM child;");
    assert_eq!(int(&res.rows[0][0]), 0);
}

#[test]
fn on_delete_restrict_and_set_null() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    q(&db, "CREATE TABLE p (id INT PRIMKEY);");
    q(
        &db,
        "CREATE TABLE c1 (pid INT FOREIGN KEY REFERENCES p(id) ON DELETE RESTRICT);",
    );
    q(
        &db,
        "CREATE TABLE c2 (pid INT FOREIGN KEY REFERENCES p(id) ON DELETE SET NULL);",
    );
    q(&db, "INSERT INTO p VALUES (1), (2);");
    q(&db, "INSERT INTO c1 VALUES (1);");
    q(&db, "INSERT INTO c2 VALUES (2);");
    let res = db.exec("DELETE FROM p WHERE id = 1;");
    assert_ne!(res.code, 0);
    let res = q(&db, "SELECT COUNT(*) FROM p WHERE id = 1;");
    assert_eq!(int(&res.rows[0][0]), 1);
    q(&db, "DELETE FROM p WHERE id = 2;");
    let res = q(&db, "SELECT pid FROM c2;");
    assert!(res.rows[0][0].is_null());
}

#[test]
fn foreign_key_insert_validation() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    q(&db, "CREATE TABLE p (id INT PRIMKEY);");
    q(&db, "CREATE TABLE c (pid INT FOREIGN KEY REFERENCES p(id));");
    q(&db, "INSERT INTO p VALUES (1);");
    q(&db, "INSERT INTO c VALUES (1);");
    let res = db.exec("INSERT INTO c VALUES (99);");
    assert_ne!(res.code, 0);
    assert!(res.message.contains("fkey"), "{}", res.message);
}

#[test]
fn duplicate_primary_key_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    q(&db, "CREATE TABLE t (id INT PRIMKEY, name TEXT);");
    q(&db, "INSERT INTO t VALUES (1, 'x');");
    let res = db.exec("INSERT INTO t VALUES (1, 'y');");
    assert_eq!(res.code, crate::DbError::constraint("", "").code());
    let res = q(&db, "SELECT COUNT(*) FROM t WHERE id = 1;");
    assert_eq!(int(&res.rows[0][0]), 1);
}

#[test]
fn multi_row_insert_rolls_back_whole_statement() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    q(&db, "CREATE TABLE t (id INT PRIMKEY);");
    q(&db, "INSERT INTO t VALUES (5);");
    // Second row collides; the first row of the statement must be undone.
    let res = db.exec("INSERT INTO t VALUES (6), (5);");
    assert_ne!(res.code, 0);
    let res = q(&db, "SELECT COUNT(*) FROM t;");
    assert_eq!(int(&res.rows[0][0]), 1);
    let res = q(&db, "SELECT COUNT(*) FROM t WHERE id = 6;");
    assert_eq!(int(&res.rows[0][0]), 0);
}

#[test]
fn not_null_and_check_constraints() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    q(
        &db,
        "CREATE TABLE t (id INT PRIMKEY, name TEXT NOT NULL, salary DOUBLE CHECK (salary > 0));",
    );
    let res = db.exec("INSERT INTO t VALUES (1, NULL, 10.0);");
    assert_ne!(res.code, 0);
    let res = db.exec("INSERT INTO t VALUES (1, 'a', -5.0);");
    assert_ne!(res.code, 0);
    q(&db, "INSERT INTO t VALUES (1, 'a', 5.0);");
    let res = q(&db, "SELECT COUNT(*) FROM t;");
    assert_eq!(int(&res.rows[0][0]), 1);
}

#[test]
fn unique_constraint() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    q(&db, "CREATE TABLE t (id INT PRIMKEY, email TEXT UNIQUE);");
    q(&db, "INSERT INTO t VALUES (1, 'a@x'), (2, 'b@x');");
    let res = db.exec("INSERT INTO t VALUES (3, 'a@x');");
    assert_ne!(res.code, 0);
    q(&db, "INSERT INTO t VALUES (3, NULL);");
    q(&db, "INSERT INTO t VALUES (4, NULL);");
}

#[test]
fn defaults_including_function_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    q(
        &db,
        "CREATE TABLE t (id SERIAL PRIMKEY, status TEXT DEFAULT 'new', \
         created_at TIMESTAMP DEFAULT NOW());",
    );
    q(&db, "INSERT INTO t (id) VALUES (1);");
    let res = q(&db, "SELECT status, created_at FROM t;");
    assert_eq!(res.rows[0][0], ColumnValue::Str("new".into()));
    assert!(matches!(res.rows[0][1], ColumnValue::Timestamp(_)));
}

#[test]
fn expressions_like_between_in() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    seed_employees(&db);
    let res = q(&db, "SELECT name FROM employees WHERE name LIKE 'a%';");
    assert_eq!(res.rows.len(), 1);
    assert_eq!(res.rows[0][0], ColumnValue::Str("alice".into()));
    let res = q(
        &db,
        "SELECT COUNT(*) FROM employees WHERE age BETWEEN 30 AND 40;",
    );
    assert_eq!(int(&res.rows[0][0]), 5);
    let res = q(
        &db,
        "SELECT COUNT(*) FROM employees WHERE department IN ('HR', 'Sales');",
    );
    assert_eq!(int(&res.rows[0][0]), 7);
    let res = q(
        &db,
        "SELECT COUNT(*) FROM employees WHERE NOT department = 'HR';",
    );
    assert_eq!(int(&res.rows[0][0]), 12);
}

#[test]
fn aggregates() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    seed_employees(&db);
    let res = q(
        &db,
        "SELECT COUNT(*), MIN(salary), MAX(salary), AVG(age) FROM employees;",
    );
    assert_eq!(int(&res.rows[0][0]), 15);
    assert_eq!(dbl(&res.rows[0][1]), 52000.0);
    assert_eq!(dbl(&res.rows[0][2]), 102000.0);
    let avg_age = dbl(&res.rows[0][3]);
    assert!(avg_age > 20.0 && avg_age < 60.0);
    let res = q(&db, "SELECT SUM(age) FROM employees WHERE department = 'HR';");
    assert_eq!(int(&res.rows[0][0]), 45 + 38 + 57);
}

#[test]
fn scalar_functions_project() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    seed_employees(&db);
    let res = q(
        &db,
        "SELECT UPPER(name), LENGTH(name), ABS(0 - age) FROM employees WHERE id = 1;",
    );
    assert_eq!(res.rows[0][0], ColumnValue::Str("ALICE".into()));
    assert_eq!(int(&res.rows[0][1]), 5);
    assert_eq!(int(&res.rows[0][2]), 34);
    let res = q(
        &db,
        "SELECT CONCAT(name, '@', department) AS mail FROM employees WHERE id = 2;",
    );
    assert_eq!(res.aliases, vec!["mail"]);
    assert_eq!(res.rows[0][0], ColumnValue::Str("bob@Engineering".into()));
    let res = q(&db, "SELECT COALESCE(NULL, 7) FROM employees LIM 1;");
    assert_eq!(int(&res.rows[0][0]), 7);
}

#[test]
fn order_by_multiple_keys() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    seed_employees(&db);
    let res = q(
        &db,
        "SELECT department, salary FROM employees ORDER BY department ASC, salary DESC;",
    );
    let mut prev: Option<(String, f64)> = None;
    for row in &res.rows {
        let dept = row[0].str().unwrap().to_string();
        let sal = dbl(&row[1]);
        if let Some((pd, ps)) = &prev {
            assert!(*pd <= dept);
            if *pd == dept {
                assert!(*ps >= sal);
            }
        }
        prev = Some((dept, sal));
    }
}

#[test]
fn restart_preserves_rows_and_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = open(dir.path());
        q(
            &db,
            "CREATE TABLE t (id SERIAL PRIMKEY, name VARCHAR(20) NOT NULL);",
        );
        q(&db, "INSERT INTO t (name) VALUES ('alice'), ('bob');");
        db.save().unwrap();
    }
    {
        let db = open(dir.path());
        let res = q(&db, "SELECT id, name FROM t ORDER BY id;");
        assert_eq!(res.rows.len(), 2);
        assert_eq!(res.rows[1][1], ColumnValue::Str("bob".into()));
        // Index survives restart too: point lookup goes through the tree.
        let res = q(&db, "SELECT name FROM t WHERE id = 2;");
        assert_eq!(res.rows[0][0], ColumnValue::Str("bob".into()));
    }
    // open -> close -> open is a no-op on the data.
    {
        let db = open(dir.path());
        let res = q(&db, "SELECT COUNT(*) FROM t;");
        assert_eq!(int(&res.rows[0][0]), 2);
        // Sequences keep counting after restart.
        q(&db, "INSERT INTO t (name) VALUES ('carol');");
        let res = q(&db, "SELECT id FROM t WHERE name = 'carol';");
        assert_eq!(int(&res.rows[0][0]), 3);
    }
}

#[test]
fn wal_replay_recovers_unflushed_rows() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = open(dir.path());
        q(&db, "CREATE TABLE t (id INT PRIMKEY, name TEXT);");
        db.save().unwrap();
        q(&db, "INSERT INTO t VALUES (1, 'survivor');");
        q(&db, "INSERT INTO t VALUES (2, 'casualty');");
        q(&db, "DELETE FROM t WHERE id = 2;");
        // Simulated crash: no flush, no checkpoint, no Drop.
        std::mem::forget(db);
    }
    for _ in 0..2 {
        // Replaying twice converges to the same state.
        let db = open(dir.path());
        let res = q(&db, "SELECT id, name FROM t ORDER BY id;");
        assert_eq!(res.rows.len(), 1);
        assert_eq!(res.rows[0][1], ColumnValue::Str("survivor".into()));
        std::mem::forget(db);
    }
}

#[test]
fn toast_roundtrip_for_oversized_strings() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    q(&db, "CREATE TABLE t (id INT PRIMKEY, body TEXT);");
    let big = "lorem ipsum dolor sit amet ".repeat(300);
    assert!(big.len() > crate::toast::TOAST_CHUNK_SIZE);
    q(
        &db,
        &format!("INSERT INTO t VALUES (1, '{}');", big.replace('\'', "''")),
    );
    let res = q(&db, "SELECT body FROM t WHERE id = 1;");
    assert_eq!(res.rows[0][0], ColumnValue::Str(big.clone()));
    // The stored row holds a toast reference, not the payload.
    let raw = db.scan_table("t").unwrap();
    assert!(raw[0].values[1].is_toast());
    // And it survives a restart.
    db.save().unwrap();
    drop(db);
    let db = open(dir.path());
    let res = q(&db, "SELECT body FROM t;");
    assert_eq!(res.rows[0][0], ColumnValue::Str(big));
}

#[test]
fn alter_table_forms() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    q(&db, "CREATE TABLE t (id INT PRIMKEY, name TEXT);");
    q(&db, "INSERT INTO t VALUES (1, 'a'), (2, 'b');");

    q(&db, "ALTER TABLE t ADD COLUMN score INT DEFAULT 10;");
    let res = q(&db, "SELECT score FROM t WHERE id = 1;");
    assert_eq!(int(&res.rows[0][0]), 10);

    q(&db, "ALTER TABLE t RENAME COLUMN score TO points;");
    let res = q(&db, "SELECT points FROM t WHERE id = 2;");
    assert_eq!(int(&res.rows[0][0]), 10);

    q(&db, "ALTER TABLE t ALTER COLUMN name SET NOT NULL;");
    let res = db.exec("INSERT INTO t VALUES (3, NULL, 1);");
    assert_ne!(res.code, 0);

    q(&db, "ALTER TABLE t DROP COLUMN points;");
    let res = q(&db, "SELECT * FROM t WHERE id = 1;");
    assert_eq!(res.rows[0].len(), 2);

    q(&db, "ALTER TABLE t ADD CONSTRAINT pos_id CHECK (id > 0);");
    let res = db.exec("INSERT INTO t VALUES (-1, 'neg');");
    assert_ne!(res.code, 0);
    q(&db, "ALTER TABLE t DROP CONSTRAINT pos_id;");
    q(&db, "INSERT INTO t VALUES (-1, 'neg');");

    q(&db, "ALTER TABLE t RENAME TO t2;");
    let res = q(&db, "SELECT COUNT(*) FROM t2;");
    assert_eq!(int(&res.rows[0][0]), 3);
    let res = db.exec("SELECT * FROM t;");
    assert_ne!(res.code, 0);
}

#[test]
fn alter_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = open(dir.path());
        q(&db, "CREATE TABLE t (id INT PRIMKEY);");
        q(&db, "INSERT INTO t VALUES (1);");
        q(&db, "ALTER TABLE t ADD COLUMN tag TEXT DEFAULT 'x';");
        db.save().unwrap();
    }
    let db = open(dir.path());
    let res = q(&db, "SELECT tag FROM t WHERE id = 1;");
    assert_eq!(res.rows[0][0], ColumnValue::Str("x".into()));
}

#[test]
fn index_and_rows_stay_consistent() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    q(&db, "CREATE TABLE t (id INT PRIMKEY, v INT);");
    for i in 0..50 {
        q(&db, &format!("INSERT INTO t VALUES ({i}, {});", i * 10));
    }
    for i in (0..50).step_by(3) {
        q(&db, &format!("DELETE FROM t WHERE id = {i};"));
    }
    for i in (1..50).step_by(5) {
        q(&db, &format!("UPDATE t SET v = v + 1 WHERE id = {i};"));
    }
    // Every index entry must point at a live row with that key, and every
    // live row must be findable through the index.
    let rows = db.scan_table("t").unwrap();
    let tree = db.tree("t", "id").unwrap();
    tree.check().unwrap();
    let mut entries = Vec::new();
    tree.for_each(&mut |k, rid| entries.push((k.clone(), rid)));
    assert_eq!(entries.len(), rows.len());
    for (key, rid) in &entries {
        let row = rows.iter().find(|r| r.id == *rid).expect("index points at live row");
        assert_eq!(row.values[0], *key);
    }
    for row in &rows {
        assert_eq!(db.index_lookup("t", "id", &row.values[0]).unwrap(), row.id);
    }
}

#[test]
fn tombstoned_rows_and_null_bitmap_invariants() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    q(&db, "CREATE TABLE t (id INT PRIMKEY, a TEXT, b INT);");
    q(&db, "INSERT INTO t VALUES (1, NULL, 5), (2, 'x', NULL);");
    q(&db, "DELETE FROM t WHERE id = 1;");
    let pool = db.pool("t").unwrap();
    let pp = pool.get_page(0).unwrap();
    let page = pp.borrow();
    assert_eq!(page.rows.len(), 2);
    assert_eq!(page.live_rows(), 1);
    let schema = db.catalog("t").unwrap().schema;
    for row in &page.rows {
        let bm = row.null_bitmap(&schema);
        for (i, v) in row.values.iter().enumerate() {
            let bit = bm[i / 8] & (1 << (i % 8)) != 0;
            assert_eq!(bit, v.is_null());
        }
    }
}

#[test]
fn create_table_name_conflicts() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    q(&db, "CREATE TABLE t (id INT PRIMKEY);");
    let res = db.exec("CREATE TABLE t (id INT PRIMKEY);");
    assert_ne!(res.code, 0);
    let res = q(&db, "CREATE TABLE IF NOT EXISTS t (id INT PRIMKEY);");
    assert_eq!(res.code, 0);
}

#[test]
fn catalog_is_self_describing() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    // The meta-tables describe themselves.
    let res = q(&db, "SELECT name FROM jb_tables ORDER BY id;");
    let names: Vec<String> = res.rows.iter().map(|r| r[0].str().unwrap().to_string()).collect();
    assert_eq!(names[0], "jb_tables");
    assert!(names.contains(&"jb_attribute".to_string()));
    // User DDL lands in the catalog through the same path.
    q(&db, "CREATE TABLE invoices (id SERIAL PRIMKEY, total DOUBLE);");
    let res = q(&db, "SELECT id FROM jb_tables WHERE name = 'invoices';");
    assert_eq!(res.rows.len(), 1);
    let tid = int(&res.rows[0][0]);
    let res = q(
        &db,
        &format!("SELECT COUNT(*) FROM jb_attribute WHERE table_id = {tid};"),
    );
    assert_eq!(int(&res.rows[0][0]), 2);
    let res = q(
        &db,
        "SELECT current_value FROM jb_sequences WHERE name = 'invoices_id_seq';",
    );
    assert_eq!(int(&res.rows[0][0]), 0);
}

#[test]
fn arrays_store_and_index_access() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    q(&db, "CREATE TABLE t (id INT PRIMKEY, tags TEXT[]);");
    q(&db, "INSERT INTO t VALUES (1, {'red','green','blue'});");
    let res = q(&db, "SELECT tags[1] FROM t WHERE id = 1;");
    assert_eq!(res.rows[0][0], ColumnValue::Str("green".into()));
    q(&db, "UPDATE t SET tags[0] = 'crimson' WHERE id = 1;");
    let res = q(&db, "SELECT tags[0] FROM t WHERE id = 1;");
    assert_eq!(res.rows[0][0], ColumnValue::Str("crimson".into()));
}

#[test]
fn datetime_columns_and_arithmetic() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    q(
        &db,
        "CREATE TABLE ev (id INT PRIMKEY, on_date DATE, at_time TIME, stamp TIMESTAMP);",
    );
    q(
        &db,
        "INSERT INTO ev VALUES (1, '2024-02-29', '13:30:00', '2024-02-29 13:30:00');",
    );
    let res = q(&db, "SELECT on_date, at_time, stamp FROM ev;");
    assert_eq!(res.rows[0][0].to_string(), "2024-02-29");
    assert_eq!(res.rows[0][1].to_string(), "13:30:00");
    assert_eq!(res.rows[0][2].to_string(), "2024-02-29 13:30:00");
    let res = q(
        &db,
        "SELECT COUNT(*) FROM ev WHERE on_date = '2024-02-29';",
    );
    assert_eq!(int(&res.rows[0][0]), 1);
    let res = q(&db, "SELECT EXTRACT(YEAR FROM stamp) FROM ev;");
    assert_eq!(int(&res.rows[0][0]), 2024);
    let res = db.exec("INSERT INTO ev VALUES (2, '2023-02-29', NULL, NULL);");
    assert_ne!(res.code, 0);
}

#[test]
fn cascade_cycle_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    q(&db, "CREATE TABLE a (id INT PRIMKEY);");
    q(
        &db,
        "CREATE TABLE b (id INT PRIMKEY FOREIGN KEY REFERENCES a(id) ON DELETE CASCADE);",
    );
    // a <- b and then b <- a: deleting from either side recurses.
    q(
        &db,
        "ALTER TABLE a ADD CONSTRAINT a_b_fkey FOREIGN KEY (id) REFERENCES b (id) ON DELETE CASCADE;",
    );
    q(&db, "INSERT _unsafecon INTO a VALUES (1);");
    q(&db, "INSERT _unsafecon INTO b VALUES (1);");
    let res = db.exec("DELETE FROM a WHERE id = 1;");
    // Either the cycle guard fires or one side empties first; never a
    // stack overflow. The guard is the expected outcome.
    assert!(res.code == 0 || res.message.contains("depth"), "{}", res.message);
}
