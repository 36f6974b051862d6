use mvcframe::controller::ControllerRegistry;
use mvcframe::exception::Exception;
use mvcframe::router::{RerouteTable, RouteId, Router};
use mvcframe::Config;

use proptest::prelude::*;
use std::collections::BTreeMap;

fn router(pairs: &[(&str, &str)]) -> Router {
    let routes: BTreeMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Router::new("/", RerouteTable::new(routes).unwrap())
}

#[test]
fn test_four_segments_make_id_list() {
    let route = router(&[]).route("/users/5/a/b").unwrap();
    assert_eq!(route.controller(), Some("users"));
    assert_eq!(route.id(), Some(&RouteId::List(vec!["a".into(), "b".into()])));
}

#[test]
fn test_controller_reroute_keeps_module_and_id() {
    let route = router(&[("u", "users")]).route("/u/edit/9").unwrap();
    assert_eq!(route.controller(), Some("users"));
    assert_eq!(route.module(), Some("edit"));
    assert_eq!(route.id(), Some(&RouteId::Int(9)));
}

#[test]
fn test_module_reroute_wins() {
    let route = router(&[("users/old", "people/new"), ("users", "members")])
        .route("/users/old")
        .unwrap();
    assert_eq!(route.to_string(), "people/new");
}

#[test]
fn test_config_reroutes_resolve_to_auth() {
    let config = Config::new()
        .with_reroute("login", "auth/login")
        .with_reroute("register", "auth/register");
    let router = Router::from_config(&config).unwrap();
    let registry = ControllerRegistry::with_defaults().unwrap();

    let mut route = router.route("/login").unwrap();
    assert_eq!(route.to_string(), "auth/login");
    assert!(registry.validate(&mut route));

    let mut route = router.route("/auth/unknown").unwrap();
    assert!(!registry.validate(&mut route));
}

#[test]
fn test_cyclic_config_is_rejected() {
    let config = Config::new()
        .with_reroute("a", "b/x")
        .with_reroute("b/x", "a");
    assert!(matches!(
        Router::from_config(&config),
        Err(Exception::RerouteCycle(_))
    ));
}

#[test]
fn test_chain_revisiting_a_key_with_another_module() {
    // a/m -> b/m -> a/n -> b/n
    let route = router(&[("a", "b"), ("b/m", "a/n")]).route("/a/m/7").unwrap();
    assert_eq!(route.controller(), Some("b"));
    assert_eq!(route.module(), Some("n"));
    assert_eq!(route.id(), Some(&RouteId::Int(7)));
}

fn reroute_entry() -> impl Strategy<Value = String> {
    (
        prop::sample::select(vec!["a", "b", "c"]),
        prop::option::of(prop::sample::select(vec!["m", "n"])),
    )
        .prop_map(|(controller, module)| match module {
            Some(module) => format!("{}/{}", controller, module),
            None => controller.to_string(),
        })
}

proptest! {
    #[test]
    fn prop_accepted_table_never_cycles_at_request_time(
        routes in prop::collection::btree_map(reroute_entry(), reroute_entry(), 0..6),
        path in "/[abcd](/[mnz]){0,1}(/[0-9]){0,1}",
    ) {
        if let Ok(table) = RerouteTable::new(routes) {
            let router = Router::new("/", table);
            prop_assert!(router.route(&path).is_ok());
        }
    }

    #[test]
    fn prop_split_matches_segment_count(
        controller in "[a-z]{1,8}",
        rest in proptest::collection::vec("[a-z0-9]{1,6}", 0..5),
    ) {
        let path = format!("/{}/{}", controller, rest.join("/"));
        let route = router(&[]).route(&path).unwrap();
        prop_assert_eq!(route.controller(), Some(controller.as_str()));
        if rest.len() > 2 {
            prop_assert_eq!(route.id(), Some(&RouteId::List(rest[1..].to_vec())));
        }
        if let Some(first) = rest.first() {
            let numeric = first.bytes().all(|b| b.is_ascii_digit());
            prop_assert_eq!(route.module().is_none(), numeric);
        }
    }

    #[test]
    fn prop_query_string_never_changes_route(
        path in "/[a-z]{1,6}(/[a-z]{1,6}){0,2}",
        query in "[a-z]{1,4}=[a-z0-9/]{0,6}",
    ) {
        let router = router(&[]);
        let plain = router.route(&path).unwrap();
        let with_query = router.route(&format!("{}?{}", path, query)).unwrap();
        prop_assert_eq!(plain, with_query);
    }
}
