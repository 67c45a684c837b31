//! End-to-end rule chain tests: compile rule text, evaluate request
//! events, check verdicts and graph structure.

use raudit_proto::{Event, EventKind, PrintMode, TypeCode, Value, schema};
use raudit_rules::{ModuleRegistry, Outcome, RuleChain, RuleError, RuleLocal};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn compile(rules: &str) -> RuleChain {
    let registry = ModuleRegistry::new();
    let mut sink = Event::new(EventKind::Reply);
    RuleChain::parse(rules, &registry, &mut sink)
        .unwrap_or_else(|e| panic!("compile failed: {e}\nrules: {rules}"))
}

fn compile_err(rules: &str) -> (RuleError, Event) {
    let registry = ModuleRegistry::new();
    let mut sink = Event::new(EventKind::Reply);
    let err = RuleChain::parse(rules, &registry, &mut sink).expect_err("expected parse failure");
    (err, sink)
}

fn request(fields: &[(&str, &str)]) -> Event {
    let mut ev = Event::new(EventKind::Request);
    for (name, value) in fields {
        ev.append_scanned(name, TypeCode::String, value).unwrap();
    }
    ev
}

fn eval(chain: &RuleChain, request: &Event) -> (Outcome, bool, Event) {
    let mut reply = schema::reply_template();
    let mut local = RuleLocal::new();
    let outcome = chain.run(&mut local, request, &mut reply);
    (outcome, schema::reply_denied(&reply), reply)
}

fn reply_note(reply: &Event) -> Option<String> {
    reply
        .unit_by_name("note")
        .map(|u| u.value().print(PrintMode::Wire))
}

// ---------------------------------------------------------------------------
// Verdicts
// ---------------------------------------------------------------------------

#[test]
fn deny_on_match_allow_otherwise() {
    let chain = compile("%default method:string = \"DELETE\" : deny");

    let (outcome, denied, _) = eval(&chain, &request(&[("method", "DELETE")]));
    assert_eq!(outcome, Outcome::Ok);
    assert!(denied);

    let (outcome, denied, _) = eval(&chain, &request(&[("method", "GET")]));
    assert_eq!(outcome, Outcome::Ok);
    assert!(!denied);
}

#[test]
fn empty_chain_allows() {
    let chain = compile("");
    assert_eq!(chain.node_count(), 0);
    let (outcome, denied, _) = eval(&chain, &request(&[]));
    assert_eq!(outcome, Outcome::Ok);
    assert!(!denied);
}

#[test]
fn missing_field_does_not_match() {
    let chain = compile("method:string = DELETE : deny");
    let (_, denied, _) = eval(&chain, &request(&[("other", "DELETE")]));
    assert!(!denied);
}

#[test]
fn boolean_operators() {
    let chain = compile("a:string = 1 & b:string = 2 : deny");
    assert!(eval(&chain, &request(&[("a", "1"), ("b", "2")])).1);
    assert!(!eval(&chain, &request(&[("a", "1"), ("b", "9")])).1);
    assert!(!eval(&chain, &request(&[("a", "9"), ("b", "2")])).1);

    let chain = compile("a:string = 1 | b:string = 2 : deny");
    assert!(eval(&chain, &request(&[("a", "1"), ("b", "9")])).1);
    assert!(eval(&chain, &request(&[("a", "9"), ("b", "2")])).1);
    assert!(!eval(&chain, &request(&[("a", "9"), ("b", "9")])).1);

    let chain = compile("! a:string = 1 : deny");
    assert!(!eval(&chain, &request(&[("a", "1")])).1);
    assert!(eval(&chain, &request(&[("a", "2")])).1);

    let chain = compile("( a:string = 1 | b:string = 2 ) & ! c:string = 3 : deny");
    assert!(eval(&chain, &request(&[("a", "1"), ("c", "0")])).1);
    assert!(!eval(&chain, &request(&[("a", "1"), ("c", "3")])).1);
}

#[test]
fn precedence_and_binds_tighter_than_or() {
    // a | b & c  parses as  a | (b & c)
    let chain = compile("a:string = 1 | b:string = 2 & c:string = 3 : deny");
    assert!(eval(&chain, &request(&[("a", "1")])).1);
    assert!(eval(&chain, &request(&[("b", "2"), ("c", "3")])).1);
    assert!(!eval(&chain, &request(&[("b", "2"), ("c", "9")])).1);
}

// ---------------------------------------------------------------------------
// Rule chaining, continue, sticky flags
// ---------------------------------------------------------------------------

#[test]
fn continue_runs_both_bodies_and_deny_is_sticky() {
    // Two rules over the same test; the first continues into the second.
    // A later allow must not clear the earlier deny.
    let chain = compile(
        "%default a:string = \"x\" : continue; deny\n%default a:string = \"x\" : allow",
    );

    let (_, denied, _) = eval(&chain, &request(&[("a", "x")]));
    assert!(denied, "deny from the first body must stick");

    let (_, denied, _) = eval(&chain, &request(&[("a", "y")]));
    assert!(!denied);
}

#[test]
fn continue_graft_shares_second_root() {
    let chain = compile(
        "%default a:string = \"x\" : continue; deny\n%default a:string = \"x\" : allow",
    );

    // Both rules share one deduplicated test instance.
    assert_eq!(chain.test_count(), 1);

    // Walk: root tests a=x; its true leaf carries the continue body and
    // grafts onto the second rule's root, as does the false leaf.
    let root = chain.root().expect("chain has rules");
    let root_info = chain.info(root);
    assert!(root_info.has_test);

    let true_leaf = chain.info(root_info.on_true.unwrap());
    let body = true_leaf.body.expect("true leaf carries the body");
    assert!(body.deny && body.cont);

    let second_root = true_leaf.jump.expect("continue grafts the next rule");
    let false_leaf = chain.info(root_info.on_false.unwrap());
    assert_eq!(
        false_leaf.jump,
        Some(second_root),
        "both frontiers graft onto the same root"
    );

    // Shared from two frontiers: refcounted, not copied.
    let second_info = chain.info(second_root);
    assert!(second_info.has_test);
    assert_eq!(second_info.refs, 2);
}

#[test]
fn without_continue_match_stops_the_chain() {
    // First rule matches and does not continue: the second rule's action
    // must not run.
    let chain = compile(
        "a:string = x : deny\na:string = x : reply note:string second",
    );
    let (_, denied, reply) = eval(&chain, &request(&[("a", "x")]));
    assert!(denied);
    assert_eq!(reply_note(&reply), None);
}

#[test]
fn no_match_falls_through_to_next_rule() {
    let chain = compile(
        "a:string = x : deny\nb:string = y : reply note:string second",
    );
    let (_, denied, reply) = eval(&chain, &request(&[("b", "y")]));
    assert!(!denied);
    assert_eq!(reply_note(&reply), Some("second".into()));
}

#[test]
fn drop_flag_is_sticky_and_does_not_stop_traversal() {
    let chain = compile(
        "a:string = x : drop; continue\nb:string = y : reply note:string reached",
    );
    let (outcome, denied, reply) = eval(&chain, &request(&[("a", "x"), ("b", "y")]));
    assert_eq!(outcome, Outcome::Drop);
    assert!(!denied, "drop alone does not deny");
    assert_eq!(
        reply_note(&reply),
        Some("reached".into()),
        "traversal continues past a drop"
    );
}

#[test]
fn deny_continue_matrix() {
    // {deny, continue, drop} x {match, no-match} over two-rule chains,
    // the second rule leaving a marker.
    struct Case {
        rules: &'static str,
        field: (&'static str, &'static str),
        denied: bool,
        outcome: Outcome,
        second_ran: bool,
    }
    let cases = [
        Case {
            rules: "a:string = x : deny\ntrue_marker:string = * : reply note:string m",
            field: ("a", "x"),
            denied: true,
            outcome: Outcome::Ok,
            second_ran: false,
        },
        Case {
            rules: "a:string = x : deny; continue\nb:string = y : reply note:string m",
            field: ("a", "x"),
            denied: true,
            outcome: Outcome::Ok,
            second_ran: false, // second rule evaluated but b != y
        },
        Case {
            rules: "a:string = x : deny; continue\na:string = x : reply note:string m",
            field: ("a", "x"),
            denied: true,
            outcome: Outcome::Ok,
            second_ran: true,
        },
        Case {
            rules: "a:string = x : drop\na:string = x : reply note:string m",
            field: ("a", "x"),
            denied: false,
            outcome: Outcome::Drop,
            second_ran: false,
        },
        Case {
            rules: "a:string = x : deny\na:string = x : reply note:string m",
            field: ("a", "z"),
            denied: false,
            outcome: Outcome::Ok,
            second_ran: false, // no match anywhere
        },
    ];

    for (i, case) in cases.iter().enumerate() {
        let chain = compile(case.rules);
        let (outcome, denied, reply) = eval(&chain, &request(&[case.field]));
        assert_eq!(outcome, case.outcome, "case {i}: outcome");
        assert_eq!(denied, case.denied, "case {i}: deny");
        assert_eq!(reply_note(&reply).is_some(), case.second_ran, "case {i}: marker");
    }
}

#[test]
fn actions_run_in_parse_order() {
    // The reply module overwrites in place, so the surviving value is
    // the last action's.
    let chain = compile("a:string = x : reply note:string first ; reply note:string last");
    let (_, _, reply) = eval(&chain, &request(&[("a", "x")]));
    assert_eq!(reply_note(&reply), Some("last".into()));
}

// ---------------------------------------------------------------------------
// Instance deduplication
// ---------------------------------------------------------------------------

#[test]
fn identical_tests_share_one_instance() {
    let chain = compile(
        "method:string = GET : allow\nmethod:string = \"GET\" : deny",
    );
    assert_eq!(chain.test_count(), 1);
}

#[test]
fn different_tests_get_distinct_instances() {
    let chain = compile("method:string = GET : allow\nmethod:string = POST : deny");
    assert_eq!(chain.test_count(), 2);
}

#[test]
fn identical_actions_share_one_instance() {
    let chain = compile(
        "a:string = 1 : reply note:string m\nb:string = 2 : reply note:string m",
    );
    assert_eq!(chain.action_count(), 1);

    let chain = compile(
        "a:string = 1 : reply note:string m\nb:string = 2 : reply note:string other",
    );
    assert_eq!(chain.action_count(), 2);
}

#[test]
fn mixed_modules_dedup_independently() {
    let chain = compile(
        "%regex agent \"^curl/\" : deny\n%regex agent \"^curl/\" & method:string = GET : deny",
    );
    assert_eq!(chain.test_count(), 2); // one regex, one default
    assert_eq!(chain.module_count(), 2);
}

// ---------------------------------------------------------------------------
// Parse failures
// ---------------------------------------------------------------------------

#[test]
fn parse_is_all_or_nothing() {
    let (err, sink) = compile_err("method:string = GET : deny\nbroken without colon");
    assert!(matches!(err, RuleError::Usage { .. }));
    // The sink carries the first diagnostic.
    let error_unit = sink.unit_by_name("error").expect("diagnostic recorded");
    assert!(
        error_unit
            .value()
            .as_str()
            .unwrap()
            .contains("usage error")
    );
    assert!(sink.unit_by_name("line").is_some());
}

#[test]
fn sink_keeps_only_the_first_diagnostic() {
    let registry = ModuleRegistry::new();
    let mut sink = Event::new(EventKind::Reply);
    let first = RuleChain::parse("%nonesuch x : deny", &registry, &mut sink).unwrap_err();
    assert!(matches!(first, RuleError::Internal(_)));
    let recorded = sink.unit_by_name("error").unwrap().value().print(PrintMode::Wire);

    // A second failed parse against the same sink must not overwrite it.
    let _ = RuleChain::parse("also broken :", &registry, &mut sink).unwrap_err();
    let still = sink.unit_by_name("error").unwrap().value().print(PrintMode::Wire);
    assert_eq!(recorded, still);
    assert_eq!(sink.units().iter().filter(|u| u.name() == "error").count(), 1);
}

#[test]
fn unknown_module_is_internal_error() {
    let (err, _) = compile_err("%widget x y z : deny");
    assert!(matches!(err, RuleError::Internal(_)));
}

#[test]
fn test_module_without_test_capability_rejected() {
    // 'log' only provides an action; using it as a test is a usage error.
    let (err, _) = compile_err("%log file \"/tmp/x\" : deny");
    assert!(matches!(err, RuleError::Usage { .. }));
}

#[test]
fn action_module_without_action_capability_rejected() {
    let (err, _) = compile_err("a:string = 1 : constant true");
    assert!(matches!(err, RuleError::Usage { .. }));
}

#[test]
fn diagnostics_carry_line_numbers() {
    let (err, _) = compile_err("a:string = 1 : allow\n\nb:widget = 2 : deny");
    match err {
        RuleError::Usage { line, reason } => {
            assert_eq!(line, 3);
            assert!(reason.contains("widget"));
        }
        other => panic!("expected usage error, got {other}"),
    }
}

// ---------------------------------------------------------------------------
// Module contract at chain level
// ---------------------------------------------------------------------------

mod loader {
    use std::cmp::Ordering;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    use raudit_rules::module::{ModuleLoader, State};
    use raudit_rules::{Module, ModuleHooks, Result, RuleError};

    /// A loader with one module: a test counting evaluations in module
    /// global state, with instrumented lifecycle.
    pub struct Counting {
        pub runs: Arc<AtomicUsize>,
        pub stops: Arc<AtomicUsize>,
    }

    impl ModuleLoader for Counting {
        fn load(&self, name: &str) -> Result<Module> {
            if name != "counting" {
                return Err(RuleError::Internal(format!("no such module '{name}'")));
            }
            let runs = Arc::clone(&self.runs);
            let stops = Arc::clone(&self.stops);
            let hooks = ModuleHooks {
                global_start: Some(Box::new(|| Ok(Box::new(0usize) as State))),
                global_stop: Some(Box::new(move |state| {
                    let count = state.downcast_ref::<usize>().copied().unwrap_or(0);
                    stops.store(count, AtomicOrdering::SeqCst);
                })),
                test_start: Some(Box::new(|_, _| Ok(Box::new(()) as State))),
                test_cache: Some(Box::new(|_, _| Ordering::Equal)),
                test_run: Some(Box::new(move |_, global, _| {
                    if let Some(global) = global {
                        let mut state = global.lock().unwrap();
                        if let Some(count) = state.downcast_mut::<usize>() {
                            *count += 1;
                        }
                    }
                    runs.fetch_add(1, AtomicOrdering::SeqCst);
                    true
                })),
                test_stop: Some(Box::new(|_, _| {})),
                ..Default::default()
            };
            Ok(Module::new("counting", "1.0", hooks))
        }
    }

    /// A loader producing a module missing `test_stop` (3 of 4 hooks).
    pub struct Broken;

    impl ModuleLoader for Broken {
        fn load(&self, _name: &str) -> Result<Module> {
            let hooks = ModuleHooks {
                test_start: Some(Box::new(|_, _| Ok(Box::new(()) as State))),
                test_cache: Some(Box::new(|_, _| Ordering::Equal)),
                test_run: Some(Box::new(|_, _, _| true)),
                ..Default::default()
            };
            Ok(Module::new("partial", "1.0", hooks))
        }
    }
}

#[test]
fn broken_module_rejected_at_chain_setup() {
    let registry = ModuleRegistry::with_loader(Box::new(loader::Broken));
    let mut sink = Event::new(EventKind::Reply);
    let err = RuleChain::parse("%partial : deny", &registry, &mut sink).unwrap_err();
    match err {
        RuleError::Broken { module, group } => {
            assert_eq!(module, "partial");
            assert_eq!(group, "test");
        }
        other => panic!("expected broken-module error, got {other}"),
    }
}

#[test]
fn module_global_state_lifecycle() {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    let runs = Arc::new(AtomicUsize::new(0));
    let stops = Arc::new(AtomicUsize::new(0));
    let registry = ModuleRegistry::with_loader(Box::new(loader::Counting {
        runs: Arc::clone(&runs),
        stops: Arc::clone(&stops),
    }));

    let mut sink = Event::new(EventKind::Reply);
    let chain = RuleChain::parse("%counting : allow", &registry, &mut sink).unwrap();

    let ev = request(&[]);
    for _ in 0..3 {
        eval(&chain, &ev);
    }
    assert_eq!(runs.load(AtomicOrdering::SeqCst), 3);

    // Teardown delivers the accumulated global count to global_stop.
    drop(chain);
    assert_eq!(stops.load(AtomicOrdering::SeqCst), 3);
}

#[test]
fn concurrent_evaluations_share_one_chain() {
    let chain = compile("method:string = DELETE : deny");
    let deny = request(&[("method", "DELETE")]);
    let pass = request(&[("method", "GET")]);

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                let mut local = RuleLocal::new();
                for _ in 0..100 {
                    let mut reply = schema::reply_template();
                    chain.run(&mut local, &deny, &mut reply);
                    assert!(schema::reply_denied(&reply));

                    let mut reply = schema::reply_template();
                    chain.run(&mut local, &pass, &mut reply);
                    assert!(!schema::reply_denied(&reply));
                }
            });
        }
    });
}

// ---------------------------------------------------------------------------
// Built-in module behavior through full chains
// ---------------------------------------------------------------------------

#[test]
fn regex_module_in_chain() {
    let chain = compile("%regex agent \"^curl/\" : deny");
    assert!(eval(&chain, &request(&[("agent", "curl/8.5")])).1);
    assert!(!eval(&chain, &request(&[("agent", "wget/1.21")])).1);
}

#[test]
fn constant_module_in_chain() {
    let chain = compile("%constant true : deny");
    assert!(eval(&chain, &request(&[])).1);

    let chain = compile("%constant false : deny");
    assert!(!eval(&chain, &request(&[])).1);
}

#[test]
fn typed_comparisons_in_chain() {
    let registry = ModuleRegistry::new();
    let mut sink = Event::new(EventKind::Reply);
    let chain = RuleChain::parse(
        "uid:uid = 0 & src:ip4addr = 10.0.0.0/8 : deny",
        &registry,
        &mut sink,
    )
    .unwrap();

    let mut ev = Event::new(EventKind::Request);
    ev.append_unit("uid", Value::Uid(0)).unwrap();
    ev.append_scanned("src", TypeCode::Ip4Addr, "10.1.2.3").unwrap();
    assert!(eval(&chain, &ev).1);

    let mut ev = Event::new(EventKind::Request);
    ev.append_unit("uid", Value::Uid(1000)).unwrap();
    ev.append_scanned("src", TypeCode::Ip4Addr, "10.1.2.3").unwrap();
    assert!(!eval(&chain, &ev).1);
}

#[test]
fn shadowed_credentials_govern_the_verdict() {
    // The daemon overrides a peer-claimed uid with the kernel-verified
    // one; the last append wins in lookup and so in evaluation.
    let chain = compile("uid:uid = 0 : deny");

    let mut ev = Event::new(EventKind::Request);
    ev.append_unit("uid", Value::Uid(0)).unwrap(); // peer claims root
    ev.set_uid(1000).unwrap(); // kernel says otherwise
    assert!(!eval(&chain, &ev).1);
}
