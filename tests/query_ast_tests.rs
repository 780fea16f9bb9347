mod query_ast_tests {
    use bson::{Document, doc};
    use sqlbridge::models::WarningKind;
    use sqlbridge::query_ast::{CompileError, CompiledOperation, Compiler, ParseError, Stage, compile_sql, to_document, to_json};
    use sqlbridge::CompilerConfig;

    fn pipeline(sql: &str) -> Vec<Stage> {
        match compile_sql(sql).expect("ok").operation {
            CompiledOperation::Aggregate { pipeline } => pipeline,
            other => panic!("expected aggregate for `{}`, got {:?}", sql, other),
        }
    }

    fn find_filter(sql: &str) -> Document {
        match compile_sql(sql).expect("ok").operation {
            CompiledOperation::Find { filter, .. } => filter,
            other => panic!("expected find for `{}`, got {:?}", sql, other),
        }
    }

    #[test]
    fn select_star_is_plain_find() {
        let q = compile_sql("SELECT * FROM users;").expect("ok");
        assert_eq!(q.collection, "users");
        assert_eq!(q.operation, CompiledOperation::Find { filter: Document::new(), projection: None, sort: None, limit: None, skip: None });
        assert!(q.warnings.is_empty());
        assert_eq!(to_document(&q), doc! { "operation": "find", "collection": "users", "query": {} });
    }

    #[test]
    fn conjunction_merges_at_top_level() {
        assert_eq!(find_filter("SELECT * FROM users WHERE status = 'active' AND age = 30"), doc! { "status": "active", "age": 30 });
    }

    #[test]
    fn between_is_one_range() {
        assert_eq!(find_filter("SELECT * FROM products WHERE price BETWEEN 10 AND 20"), doc! { "price": { "$gte": 10, "$lte": 20 } });
    }

    #[test]
    fn like_prefix_is_anchored_regex() {
        assert_eq!(find_filter("SELECT * FROM users WHERE name LIKE 'A%'"), doc! { "name": { "$regex": "^A.*", "$options": "i" } });
    }

    #[test]
    fn like_case_follows_config() {
        let compiler = Compiler::new(CompilerConfig { like_case_insensitive: false, default_limit: Some(50), ..CompilerConfig::default() });
        let q = compiler.compile_sql("SELECT * FROM users WHERE name LIKE '%son'").expect("ok");
        let CompiledOperation::Find { filter, limit, .. } = q.operation else { panic!("expected find") };
        assert_eq!(filter, doc! { "name": { "$regex": "^.*son$" } });
        assert_eq!(limit, Some(50));
    }

    #[test]
    fn negated_compound_condition_is_pushed_down() {
        let q = compile_sql("SELECT * FROM t WHERE NOT (a = 1 OR b = 2)").expect("ok");
        let CompiledOperation::Find { filter, .. } = &q.operation else { panic!("expected find") };
        assert_eq!(filter, &doc! { "a": { "$ne": 1 }, "b": { "$ne": 2 } });
        assert!(q.warnings.is_empty());
        assert_eq!(
            find_filter("SELECT * FROM t WHERE x = 5 AND NOT (a = 1 AND b = 2)"),
            doc! { "x": 5, "$or": [{ "a": { "$ne": 1 } }, { "b": { "$ne": 2 } }] }
        );
    }

    #[test]
    fn junk_after_comparison_value_is_dropped() {
        let q = compile_sql("SELECT * FROM t WHERE age > 18 18").expect("ok");
        let CompiledOperation::Find { filter, .. } = &q.operation else { panic!("expected find") };
        assert!(filter.is_empty());
        assert_eq!(q.warnings.len(), 1);
        assert_eq!(q.warnings[0].kind, WarningKind::UnparsableCondition);
    }

    #[test]
    fn ilike_stays_case_insensitive() {
        let compiler = Compiler::new(CompilerConfig { like_case_insensitive: false, ..CompilerConfig::default() });
        let q = compiler.compile_sql("SELECT * FROM users WHERE name ILIKE 'a%'").expect("ok");
        let CompiledOperation::Find { filter, .. } = q.operation else { panic!("expected find") };
        assert_eq!(filter, doc! { "name": { "$regex": "^a.*", "$options": "i" } });
    }

    #[test]
    fn substring_with_extreme_start() {
        let q = compile_sql("SELECT SUBSTRING(name, -9223372036854775808, 1) AS s FROM t").expect("ok");
        let CompiledOperation::Find { projection, .. } = q.operation else { panic!("expected find") };
        assert_eq!(projection, Some(doc! { "s": { "$substrCP": ["$name", i64::MIN, 1] } }));
    }

    #[test]
    fn parenthesised_table_name() {
        let q = compile_sql("SELECT * FROM (orders) WHERE id = 1").expect("ok");
        assert_eq!(q.collection, "orders");
        assert_eq!(find_filter("SELECT * FROM (orders) WHERE id = 1"), doc! { "id": 1 });
    }

    #[test]
    fn multi_row_insert_skips_bad_rows() {
        let q = compile_sql("INSERT INTO users (name, age) VALUES ('a', 1), ('b'), ('c', 3)").expect("ok");
        let CompiledOperation::Insert { documents } = &q.operation else { panic!("expected insert") };
        assert_eq!(documents, &vec![doc! { "name": "a", "age": 1 }, doc! { "name": "c", "age": 3 }]);
        assert_eq!(q.warnings.len(), 1);
        assert_eq!(q.warnings[0].kind, WarningKind::RowRejected);
        assert_eq!(to_document(&q).get_str("operation").unwrap(), "insert_many");
    }

    #[test]
    fn insert_without_columns_numbers_fields() {
        let q = compile_sql("INSERT INTO pairs VALUES (1, 'x')").expect("ok");
        assert_eq!(to_document(&q), doc! { "operation": "insert", "collection": "pairs", "document": { "column_1": 1, "column_2": "x" } });
    }

    #[test]
    fn group_by_having_stage_order() {
        let stages = pipeline("SELECT dept, COUNT(*) AS cnt FROM employees WHERE active = 1 GROUP BY dept HAVING COUNT(*) > 5 ORDER BY cnt DESC LIMIT 3");
        assert_eq!(
            stages,
            vec![
                Stage::Match(doc! { "active": 1 }),
                Stage::Group(doc! { "_id": { "dept": "$dept" }, "cnt": { "$sum": 1 } }),
                Stage::Match(doc! { "cnt": { "$gt": 5 } }),
                Stage::Project(doc! { "_id": 0, "dept": "$_id.dept", "cnt": 1 }),
                Stage::Sort(doc! { "cnt": -1 }),
                Stage::Limit(3),
            ]
        );
    }

    #[test]
    fn count_distinct_without_group_by() {
        let stages = pipeline("SELECT COUNT(DISTINCT user_id) AS visitors FROM sessions");
        assert_eq!(
            stages,
            vec![
                Stage::Group(doc! { "_id": null, "visitors": { "$addToSet": "$user_id" } }),
                Stage::Project(doc! { "_id": 0, "visitors": { "$size": "$visitors" } }),
            ]
        );
    }

    #[test]
    fn update_without_where_touches_everything() {
        let q = compile_sql("UPDATE users SET active = 0").expect("ok");
        assert_eq!(q.operation, CompiledOperation::Update { filter: Document::new(), update: doc! { "$set": { "active": 0 } } });
        assert_eq!(q.warnings[0].kind, WarningKind::AffectsAllRows);
        assert!(q.warnings[0].message.contains("affects all rows"));
    }

    #[test]
    fn compilation_is_deterministic() {
        let sql = "SELECT c.name, SUM(o.total) AS spent FROM orders o LEFT JOIN customers c ON o.customer_id = c.id \
                   WHERE o.status IN ('paid', 'shipped') GROUP BY c.name ORDER BY spent DESC";
        let first = compile_sql(sql).expect("ok");
        let second = compile_sql(sql).expect("ok");
        assert_eq!(first, second);
        assert_eq!(to_json(&first).to_string(), to_json(&second).to_string());
    }

    #[test]
    fn left_join_keeps_unmatched_rows() {
        let stages = pipeline("SELECT u.name, p.bio FROM users u LEFT JOIN profiles p ON u.id = p.user_id");
        assert_eq!(
            stages,
            vec![
                Stage::Lookup { from: "profiles".into(), local_field: Some("id".into()), foreign_field: Some("user_id".into()), as_field: "p_joined".into() },
                Stage::Unwind { path: "p_joined".into(), preserve_null_and_empty: true },
                Stage::Project(doc! { "name": 1, "p_joined.bio": 1 }),
            ]
        );
    }

    #[test]
    fn right_join_needs_manual_strategy() {
        let q = compile_sql("SELECT * FROM a RIGHT JOIN b ON a.id = b.a_id").expect("ok");
        assert!(!q.is_executable());
        assert!(matches!(q.operation, CompiledOperation::RequiresManualStrategy { .. }));
        assert_eq!(q.warnings[0].kind, WarningKind::RequiresManualStrategy);
        assert_eq!(to_document(&q).get_str("operation").unwrap(), "requires_manual_strategy");
    }

    #[test]
    fn union_lists_each_branch() {
        let q = compile_sql("SELECT id FROM a UNION ALL SELECT id FROM b").expect("ok");
        let CompiledOperation::RequiresManualStrategy { queries, .. } = &q.operation else { panic!("expected manual strategy") };
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].collection, "a");
        assert_eq!(queries[1].collection, "b");
    }

    #[test]
    fn subquery_needs_manual_strategy() {
        let q = compile_sql("SELECT * FROM users WHERE id IN (SELECT user_id FROM orders)").expect("ok");
        assert!(!q.is_executable());
    }

    #[test]
    fn create_table_wire_document() {
        let q = compile_sql("CREATE TABLE accounts (id INT PRIMARY KEY, email VARCHAR(120) NOT NULL, INDEX idx_email (email))").expect("ok");
        let wire = to_document(&q);
        assert_eq!(wire.get_str("operation").unwrap(), "create_collection_with_schema");
        let options = wire.get_document("options").unwrap();
        assert_eq!(options.get_str("validationLevel").unwrap(), "strict");
        assert_eq!(options.get_str("validationAction").unwrap(), "error");
        assert!(options.contains_key("validator"));
        let indexes = wire.get_array("indexes_to_create").unwrap();
        assert_eq!(indexes.len(), 2);
        assert_eq!(indexes[1].as_document().unwrap(), &doc! { "key": { "email": 1 }, "name": "idx_email", "unique": false });
    }

    #[test]
    fn drop_table() {
        let q = compile_sql("DROP TABLE IF EXISTS logs").expect("ok");
        assert_eq!(q.operation, CompiledOperation::DropCollection { if_exists: true });
        assert_eq!(q.collection, "logs");
    }

    #[test]
    fn fatal_errors() {
        assert!(matches!(compile_sql("SELECT 1; SELECT 2"), Err(CompileError::Parse(ParseError::AmbiguousStatement(_)))));
        assert!(matches!(compile_sql("DELETE FROM"), Err(CompileError::Parse(ParseError::MissingTable(_)))));
        assert!(matches!(compile_sql("SELECT * FROM a JOIN b ON a.x > b.y"), Err(CompileError::UnsupportedJoinCondition(_))));
        assert_eq!(compile_sql("INSERT INTO t (a, b) VALUES (1)"), Err(CompileError::NoValidRows { rejected: 1 }));
    }

    #[test]
    fn compiler_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Compiler>();
    }
}
