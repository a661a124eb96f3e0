use jsoniq_engine::types::arithmetic::ArithmeticOp;
use jsoniq_engine::types::comparison::ComparisonOp;
use jsoniq_engine::{
    Clause, DynamicContext, DynamicContextBuilder, EmptyOrder, EngineConfig, EngineConfigBuilder, ErrorCode, Expr,
    FlworExpr, GroupSpec, Item, OrderSpec, compile, evaluate,
};
use rstest::{fixture, rstest};
use rust_decimal::Decimal;

#[fixture]
fn config() -> EngineConfig {
    EngineConfig::default()
}

fn flwor(clauses: Vec<Clause>) -> Expr {
    Expr::flwor(FlworExpr::new(clauses).unwrap())
}

fn run_with(expr: Expr, config: &EngineConfig, ctx: &DynamicContext) -> jsoniq_engine::Result<Vec<Item>> {
    let query = compile(&expr, config)?;
    evaluate(&query, ctx)
}

fn run(expr: Expr) -> jsoniq_engine::Result<Vec<Item>> {
    run_with(expr, &EngineConfig::default(), &DynamicContext::default())
}

fn ints(values: &[i64]) -> Vec<Item> {
    values.iter().copied().map(Item::Integer).collect()
}

fn obj(entries: &[(&str, Item)]) -> Item {
    Item::object(entries.iter().cloned()).unwrap()
}

#[rstest]
fn where_filters_tuples() {
    let q = flwor(vec![
        Clause::for_in("x", Expr::integers(1..=3)),
        Clause::Where(Expr::value_cmp(ComparisonOp::Gt, Expr::var("x"), Expr::integer(1))),
        Clause::Return(Expr::var("x")),
    ]);
    assert_eq!(run(q).unwrap(), ints(&[2, 3]));
}

#[rstest]
fn let_after_empty_for_produces_nothing() {
    let q = flwor(vec![
        Clause::for_in("x", Expr::empty()),
        Clause::let_bind("y", Expr::integer(1)),
        Clause::Return(Expr::var("y")),
    ]);
    assert!(run(q).unwrap().is_empty());
}

#[rstest]
fn start_let_binds_whole_sequence() {
    let q = flwor(vec![
        Clause::let_bind("xs", Expr::integers(1..=3)),
        Clause::Return(Expr::array(Expr::var("xs"))),
    ]);
    assert_eq!(run(q).unwrap(), vec![Item::array(ints(&[1, 2, 3]))]);
}

#[rstest]
fn positional_variable_counts_from_one() {
    let q = flwor(vec![
        Clause::for_at("x", "i", Expr::sequence([Expr::string("a"), Expr::string("b")])),
        Clause::Return(Expr::var("i")),
    ]);
    assert_eq!(run(q).unwrap(), ints(&[1, 2]));
}

#[rstest]
fn positions_restart_per_outer_tuple() {
    let q = flwor(vec![
        Clause::for_in("x", Expr::integers(1..=2)),
        Clause::for_at("y", "i", Expr::integers(5..=6)),
        Clause::Return(Expr::var("i")),
    ]);
    assert_eq!(run(q).unwrap(), ints(&[1, 2, 1, 2]));
}

#[rstest]
fn allowing_empty_emits_one_tuple_with_position_zero() {
    let q = flwor(vec![
        Clause::For {
            var: "x".into(),
            at: Some("i".into()),
            allowing_empty: true,
            expr: Expr::empty(),
        },
        Clause::Return(Expr::array(Expr::sequence([Expr::var("x"), Expr::var("i")]))),
    ]);
    assert_eq!(run(q).unwrap(), vec![Item::array(ints(&[0]))]);
}

#[rstest]
fn allowing_empty_is_plain_for_on_non_empty_source() {
    let q = flwor(vec![
        Clause::for_allowing_empty("x", Expr::integers(1..=2)),
        Clause::Return(Expr::var("x")),
    ]);
    assert_eq!(run(q).unwrap(), ints(&[1, 2]));
}

#[rstest]
fn count_numbers_surviving_tuples() {
    let q = flwor(vec![
        Clause::for_in("x", Expr::integers(1..=6)),
        Clause::Where(Expr::value_cmp(
            ComparisonOp::Eq,
            Expr::arithmetic(ArithmeticOp::Mod, Expr::var("x"), Expr::integer(2)),
            Expr::integer(0),
        )),
        Clause::Count("c".into()),
        Clause::Return(Expr::array(Expr::sequence([Expr::var("c"), Expr::var("x")]))),
    ]);
    assert_eq!(
        run(q).unwrap(),
        vec![
            Item::array(ints(&[1, 2])),
            Item::array(ints(&[2, 4])),
            Item::array(ints(&[3, 6])),
        ]
    );
}

#[rstest]
fn group_by_keeps_first_appearance_order_and_concatenates() {
    let q = flwor(vec![
        Clause::for_in("x", Expr::integers(1..=6)),
        Clause::GroupBy(vec![GroupSpec::keyed(
            "k",
            Expr::arithmetic(ArithmeticOp::Mod, Expr::var("x"), Expr::integer(2)),
        )]),
        Clause::Return(Expr::object([("k", Expr::var("k")), ("xs", Expr::array(Expr::var("x")))])),
    ]);
    assert_eq!(
        run(q).unwrap(),
        vec![
            obj(&[("k", Item::Integer(1)), ("xs", Item::array(ints(&[1, 3, 5])))]),
            obj(&[("k", Item::Integer(0)), ("xs", Item::array(ints(&[2, 4, 6])))]),
        ]
    );
}

#[rstest]
fn group_by_collapses_numerics_by_value() {
    let q = flwor(vec![
        Clause::for_in(
            "x",
            Expr::sequence([
                Expr::integer(1),
                Expr::literal(Item::Decimal(Decimal::ONE)),
                Expr::literal(Item::Double(1.0)),
                Expr::integer(2),
            ]),
        ),
        Clause::GroupBy(vec![GroupSpec::var("x")]),
        Clause::Return(Expr::var("x")),
    ]);
    // the grouping variable takes the key of the group's first tuple
    assert_eq!(run(q).unwrap(), ints(&[1, 2]));
}

#[rstest]
fn empty_group_key_forms_its_own_group() {
    let data = Expr::sequence([
        Expr::literal(obj(&[("g", Item::string("a")), ("v", Item::Integer(1))])),
        Expr::literal(obj(&[("v", Item::Integer(2))])),
        Expr::literal(obj(&[("g", Item::string("a")), ("v", Item::Integer(3))])),
        Expr::literal(obj(&[("v", Item::Integer(4))])),
    ]);
    let q = flwor(vec![
        Clause::for_in("o", data),
        Clause::GroupBy(vec![GroupSpec::keyed("g", Expr::lookup(Expr::var("o"), "g"))]),
        Clause::Return(Expr::array(Expr::lookup(Expr::var("o"), "v"))),
    ]);
    assert_eq!(
        run(q).unwrap(),
        vec![Item::array(ints(&[1, 3])), Item::array(ints(&[2, 4]))]
    );
}

#[rstest]
fn group_by_structured_key_fails() {
    let q = flwor(vec![
        Clause::for_in("x", Expr::literal(Item::array(ints(&[1])))),
        Clause::GroupBy(vec![GroupSpec::var("x")]),
        Clause::Return(Expr::var("x")),
    ]);
    assert_eq!(run(q).unwrap_err().code, ErrorCode::JNTY0004);
}

#[rstest]
fn group_by_multi_item_key_fails() {
    let q = flwor(vec![
        Clause::for_in("x", Expr::integers(1..=2)),
        Clause::GroupBy(vec![GroupSpec::keyed("k", Expr::sequence([Expr::var("x"), Expr::var("x")]))]),
        Clause::Return(Expr::var("k")),
    ]);
    assert_eq!(run(q).unwrap_err().code, ErrorCode::XPTY0004);
}

fn people() -> Expr {
    Expr::sequence(
        [("a", 30), ("b", 20), ("c", 30), ("d", 20)]
            .into_iter()
            .map(|(name, age)| Expr::literal(obj(&[("name", Item::string(name)), ("age", Item::Integer(age))]))),
    )
}

#[rstest]
#[case::ascending(OrderSpec::ascending(Expr::lookup(Expr::var("p"), "age")), &["b", "d", "a", "c"])]
#[case::descending(OrderSpec::descending(Expr::lookup(Expr::var("p"), "age")), &["a", "c", "b", "d"])]
fn order_by_is_stable(#[case] spec: OrderSpec, #[case] expected: &[&str]) {
    let q = flwor(vec![
        Clause::for_in("p", people()),
        Clause::OrderBy(vec![spec]),
        Clause::Return(Expr::lookup(Expr::var("p"), "name")),
    ]);
    let expected: Vec<Item> = expected.iter().map(|s| Item::string(*s)).collect();
    assert_eq!(run(q).unwrap(), expected);
}

#[rstest]
fn order_by_second_key_breaks_ties() {
    let q = flwor(vec![
        Clause::for_in("p", people()),
        Clause::OrderBy(vec![
            OrderSpec::ascending(Expr::lookup(Expr::var("p"), "age")),
            OrderSpec::descending(Expr::lookup(Expr::var("p"), "name")),
        ]),
        Clause::Return(Expr::lookup(Expr::var("p"), "name")),
    ]);
    let names: Vec<Item> = ["d", "b", "c", "a"].into_iter().map(Item::string).collect();
    assert_eq!(run(q).unwrap(), names);
}

fn keyed_rows() -> Expr {
    Expr::sequence([
        Expr::literal(obj(&[("n", Item::string("two")), ("v", Item::Integer(2))])),
        Expr::literal(obj(&[("n", Item::string("missing"))])),
        Expr::literal(obj(&[("n", Item::string("one")), ("v", Item::Integer(1))])),
        Expr::literal(obj(&[("n", Item::string("null")), ("v", Item::Null)])),
    ])
}

#[rstest]
#[case::greatest(None, &["one", "two", "null", "missing"])]
#[case::explicit_greatest(Some(EmptyOrder::Greatest), &["one", "two", "null", "missing"])]
#[case::least(Some(EmptyOrder::Least), &["missing", "one", "two", "null"])]
fn empty_and_null_order_keys(#[case] order: Option<EmptyOrder>, #[case] expected: &[&str]) {
    let mut spec = OrderSpec::ascending(Expr::lookup(Expr::var("r"), "v"));
    if let Some(order) = order {
        spec = spec.empty(order);
    }
    let q = flwor(vec![
        Clause::for_in("r", keyed_rows()),
        Clause::OrderBy(vec![spec]),
        Clause::Return(Expr::lookup(Expr::var("r"), "n")),
    ]);
    let expected: Vec<Item> = expected.iter().map(|s| Item::string(*s)).collect();
    assert_eq!(run(q).unwrap(), expected);
}

#[rstest]
fn configured_empty_order_applies_to_unqualified_specs() {
    let config = EngineConfigBuilder::new().with_empty_order(EmptyOrder::Least).build();
    let q = flwor(vec![
        Clause::for_in("r", keyed_rows()),
        Clause::OrderBy(vec![OrderSpec::ascending(Expr::lookup(Expr::var("r"), "v"))]),
        Clause::Return(Expr::lookup(Expr::var("r"), "n")),
    ]);
    let out = run_with(q, &config, &DynamicContext::default()).unwrap();
    assert_eq!(out.first(), Some(&Item::string("missing")));
}

#[rstest]
fn order_by_incomparable_keys_fails() {
    let q = flwor(vec![
        Clause::for_in("x", Expr::sequence([Expr::integer(1), Expr::string("a")])),
        Clause::OrderBy(vec![OrderSpec::ascending(Expr::var("x"))]),
        Clause::Return(Expr::var("x")),
    ]);
    assert_eq!(run(q).unwrap_err().code, ErrorCode::XPTY0004);
}

#[rstest]
#[case(8)]
#[case(100)]
#[case(500)]
#[case(2000)]
fn order_by_many_mixed_keys_fails_cleanly(#[case] n: i64) {
    let keys = (0..n).map(|i| {
        if i % 2 == 0 {
            Expr::integer(n - i)
        } else {
            Expr::string(format!("k{i}"))
        }
    });
    let q = flwor(vec![
        Clause::for_in("x", Expr::sequence(keys)),
        Clause::OrderBy(vec![OrderSpec::descending(Expr::var("x"))]),
        Clause::Return(Expr::var("x")),
    ]);
    assert_eq!(run(q).unwrap_err().code, ErrorCode::XPTY0004);
}

#[rstest]
fn order_by_mixes_numeric_subtypes_and_nulls() {
    let big = 1_i64 << 53;
    let q = flwor(vec![
        Clause::for_in(
            "x",
            Expr::sequence([
                Expr::integer(big + 1),
                Expr::literal(Item::Null),
                Expr::literal(Item::Double(big as f64)),
                Expr::literal(Item::Double(f64::NAN)),
                Expr::literal(Item::Decimal(Decimal::new(-15, 1))),
                Expr::integer(big - 1),
            ]),
        ),
        Clause::OrderBy(vec![OrderSpec::ascending(Expr::var("x"))]),
        Clause::Return(Expr::var("x")),
    ]);
    let out = run(q).unwrap();
    assert!(matches!(out[0], Item::Double(d) if d.is_nan()));
    assert_eq!(
        out[1..],
        [
            Item::Decimal(Decimal::new(-15, 1)),
            Item::Integer(big - 1),
            Item::Double(big as f64),
            Item::Integer(big + 1),
            Item::Null,
        ]
    );
}

fn hex(bytes: &[u8]) -> Expr {
    Expr::literal(Item::HexBinary(bytes.to_vec()))
}

#[rstest]
#[case::equal(ComparisonOp::Eq, hex(&[0xCA, 0xFE]), true)]
#[case::different(ComparisonOp::Eq, hex(&[0xCA]), false)]
#[case::not_equal(ComparisonOp::Ne, hex(&[0xCA]), true)]
fn binary_equality(#[case] op: ComparisonOp, #[case] rhs: Expr, #[case] expected: bool) {
    let q = Expr::value_cmp(op, hex(&[0xCA, 0xFE]), rhs);
    assert_eq!(run(q).unwrap(), vec![Item::Boolean(expected)]);
}

#[rstest]
#[case::ordering(ComparisonOp::Lt, hex(&[0x01]))]
#[case::ordering_ge(ComparisonOp::Ge, hex(&[0xCA, 0xFE]))]
#[case::other_binary_type(ComparisonOp::Eq, Expr::literal(Item::Base64Binary(vec![0xCA, 0xFE])))]
#[case::string(ComparisonOp::Eq, Expr::string("CAFE"))]
#[case::number(ComparisonOp::Ne, Expr::integer(1))]
fn binary_comparison_type_errors(#[case] op: ComparisonOp, #[case] rhs: Expr) {
    let q = Expr::value_cmp(op, hex(&[0xCA, 0xFE]), rhs);
    assert_eq!(run(q).unwrap_err().code, ErrorCode::XPTY0004);
}

#[rstest]
fn binary_compares_with_null() {
    let q = Expr::value_cmp(ComparisonOp::Eq, hex(&[0xCA]), Expr::literal(Item::Null));
    assert_eq!(run(q).unwrap(), vec![Item::Boolean(false)]);
    let q = Expr::value_cmp(ComparisonOp::Lt, hex(&[0xCA]), Expr::literal(Item::Null));
    assert_eq!(run(q).unwrap(), vec![Item::Boolean(true)]);
}

#[rstest]
fn order_by_binary_keys_fails() {
    let q = flwor(vec![
        Clause::for_in("x", Expr::sequence([hex(&[0x02]), hex(&[0x01])])),
        Clause::OrderBy(vec![OrderSpec::ascending(Expr::var("x"))]),
        Clause::Return(Expr::var("x")),
    ]);
    assert_eq!(run(q).unwrap_err().code, ErrorCode::XPTY0004);
}

#[rstest]
fn nested_flwor_sees_outer_bindings() {
    let inner = flwor(vec![
        Clause::for_in("y", Expr::integers(1..=2)),
        Clause::Return(Expr::arithmetic(ArithmeticOp::Add, Expr::var("x"), Expr::var("y"))),
    ]);
    let q = flwor(vec![
        Clause::for_in("x", Expr::sequence([Expr::integer(10), Expr::integer(20)])),
        Clause::Return(inner),
    ]);
    assert_eq!(run(q).unwrap(), ints(&[11, 12, 21, 22]));
}

#[rstest]
fn external_variables_come_from_the_context(config: EngineConfig) {
    let config = EngineConfig {
        external_variables: vec!["input".into()],
        ..config
    };
    let ctx = DynamicContextBuilder::new()
        .with_variable("input", ints(&[3, 1, 2]))
        .build();
    let q = flwor(vec![
        Clause::for_in("x", Expr::var("input")),
        Clause::OrderBy(vec![OrderSpec::ascending(Expr::var("x"))]),
        Clause::Return(Expr::var("x")),
    ]);
    assert_eq!(run_with(q, &config, &ctx).unwrap(), ints(&[1, 2, 3]));
}

#[rstest]
fn object_constructor_wraps_values() {
    let q = Expr::object([
        ("none", Expr::empty()),
        ("one", Expr::integer(1)),
        ("many", Expr::integers(1..=2)),
    ]);
    let out = run(q).unwrap();
    assert_eq!(
        out,
        vec![obj(&[
            ("none", Item::Null),
            ("one", Item::Integer(1)),
            ("many", Item::array(ints(&[1, 2]))),
        ])]
    );
    assert_eq!(out[0].serialize(), r#"{ "none" : null, "one" : 1, "many" : [ 1, 2 ] }"#);
}

#[rstest]
fn duplicate_constructor_keys_fail() {
    let q = Expr::object([("a", Expr::integer(1)), ("a", Expr::integer(2))]);
    assert_eq!(run(q).unwrap_err().code, ErrorCode::JNDY0003);
}

#[rstest]
fn unbox_and_lookup_compose() {
    let data = Item::array([
        obj(&[("v", Item::Integer(1))]),
        Item::Integer(7),
        obj(&[("v", Item::Integer(2))]),
    ]);
    let q = Expr::lookup(Expr::unbox(Expr::literal(data)), "v");
    assert_eq!(run(q).unwrap(), ints(&[1, 2]));
}

#[rstest]
#[case(ArithmeticOp::Add, Expr::integer(1), Expr::integer(2), Item::Integer(3))]
#[case(ArithmeticOp::Div, Expr::integer(1), Expr::integer(2), Item::Decimal(Decimal::new(5, 1)))]
#[case(ArithmeticOp::Mul, Expr::integer(2), Expr::literal(Item::Double(1.5)), Item::Double(3.0))]
#[case(ArithmeticOp::Sub, Expr::integer(1), Expr::literal(Item::Null), Item::Null)]
fn arithmetic_promotes(#[case] op: ArithmeticOp, #[case] lhs: Expr, #[case] rhs: Expr, #[case] expected: Item) {
    assert_eq!(run(Expr::arithmetic(op, lhs, rhs)).unwrap(), vec![expected]);
}

#[rstest]
fn integer_division_by_zero_fails() {
    let err = run(Expr::arithmetic(ArithmeticOp::Div, Expr::integer(1), Expr::integer(0))).unwrap_err();
    assert_eq!(err.code, ErrorCode::FOAR0001);
}

#[rstest]
#[case(Expr::integers(1..=2), Expr::integers(2..=3), true)]
#[case(Expr::integers(1..=2), Expr::integers(5..=6), false)]
#[case(Expr::empty(), Expr::integer(1), false)]
fn general_comparison_is_existential(#[case] lhs: Expr, #[case] rhs: Expr, #[case] expected: bool) {
    let out = run(Expr::general_cmp(ComparisonOp::Eq, lhs, rhs)).unwrap();
    assert_eq!(out, vec![Item::Boolean(expected)]);
}

#[rstest]
fn value_comparison_with_empty_operand_is_empty() {
    assert!(run(Expr::value_cmp(ComparisonOp::Eq, Expr::empty(), Expr::integer(1))).unwrap().is_empty());
}

#[rstest]
fn null_compares_greater_than_everything() {
    let out = run(Expr::value_cmp(ComparisonOp::Gt, Expr::literal(Item::Null), Expr::string("z"))).unwrap();
    assert_eq!(out, vec![Item::Boolean(true)]);
}

#[rstest]
fn where_on_multi_item_sequence_fails() {
    let q = flwor(vec![
        Clause::for_in("x", Expr::integer(1)),
        Clause::Where(Expr::integers(1..=2)),
        Clause::Return(Expr::var("x")),
    ]);
    assert_eq!(run(q).unwrap_err().code, ErrorCode::FORG0006);
}

#[rstest]
fn logic_short_circuits() {
    // the right operand would fail on EBV of two items
    let q = Expr::and(Expr::literal(Item::Boolean(false)), Expr::integers(1..=2));
    assert_eq!(run(q).unwrap(), vec![Item::Boolean(false)]);
    let q = Expr::or(Expr::literal(Item::Boolean(true)), Expr::integers(1..=2));
    assert_eq!(run(q).unwrap(), vec![Item::Boolean(true)]);
}

#[rstest]
fn json_round_trip_through_a_query() {
    let input: serde_json::Value = serde_json::json!([{"n": "x", "v": 2}, {"n": "y", "v": 1}]);
    let config = EngineConfigBuilder::new().with_external_variable("rows").build();
    let ctx = DynamicContextBuilder::new()
        .with_item("rows", Item::from_json(input).unwrap())
        .build();
    let q = flwor(vec![
        Clause::for_in("r", Expr::unbox(Expr::var("rows"))),
        Clause::OrderBy(vec![OrderSpec::ascending(Expr::lookup(Expr::var("r"), "v"))]),
        Clause::Return(Expr::lookup(Expr::var("r"), "n")),
    ]);
    let out: Vec<serde_json::Value> = run_with(q, &config, &ctx).unwrap().iter().map(Item::to_json).collect();
    assert_eq!(out, vec![serde_json::json!("y"), serde_json::json!("x")]);
}

#[rstest]
#[case::integer(serde_json::json!(7), Item::Integer(7))]
#[case::beyond_i64(serde_json::json!(u64::MAX), Item::Double(u64::MAX as f64))]
#[case::fraction(serde_json::json!(2.5), Item::Double(2.5))]
#[case::nested(serde_json::json!([null, [1]]), Item::array([Item::Null, Item::array([Item::Integer(1)])]))]
fn json_numbers_map_to_integers_or_doubles(#[case] input: serde_json::Value, #[case] expected: Item) {
    assert_eq!(Item::from_json(input).unwrap(), expected);
}
