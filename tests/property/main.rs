// tests/property/main.rs

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use botfleet::exec::WorkerExit;
use botfleet::fs::mock::MockFileSystem;
use botfleet::ipc::{parse_line, Line};
use botfleet::registry::{ClientPatch, ClientRegistry};
use botfleet::supervisor::transitions::{decide_exit, ExitDecision};
use botfleet::supervisor::RestartPolicy;
use botfleet_test_utils::NewClientBuilder;

#[derive(Debug, Clone)]
enum Op {
    Add { id: u8, port: u16 },
    MovePort { id: u8, port: u16 },
    Delete { id: u8 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    // Small id and port spaces so collisions actually happen.
    let id = 0u8..6;
    let port = 4100u16..4108;
    prop_oneof![
        (id.clone(), port.clone()).prop_map(|(id, port)| Op::Add { id, port }),
        (id.clone(), port).prop_map(|(id, port)| Op::MovePort { id, port }),
        id.prop_map(|id| Op::Delete { id }),
    ]
}

fn fresh_registry() -> ClientRegistry {
    ClientRegistry::load_all("/fleet/clients.json", Arc::new(MockFileSystem::new()))
        .expect("empty registry loads")
}

proptest! {
    #[test]
    fn ports_stay_unique_under_any_mutation_sequence(
        ops in proptest::collection::vec(op_strategy(), 1..40)
    ) {
        let registry = fresh_registry();

        for op in ops {
            // Individual operations may fail; the invariant must hold regardless.
            let _ = match op {
                Op::Add { id, port } => registry
                    .add(NewClientBuilder::new(&format!("c{id}"), port).build())
                    .map(|_| ()),
                Op::MovePort { id, port } => registry
                    .update(&format!("c{id}"), &ClientPatch::port(port))
                    .map(|_| ()),
                Op::Delete { id } => registry.delete(&format!("c{id}")).map(|_| ()),
            };

            let clients = registry.get_all();
            let ports: HashSet<u16> = clients.iter().map(|c| c.port).collect();
            prop_assert_eq!(ports.len(), clients.len());
            let ids: HashSet<&str> = clients.iter().map(|c| c.id.as_str()).collect();
            prop_assert_eq!(ids.len(), clients.len());
        }

        // What is in memory is exactly what a reload sees.
        let in_memory: Vec<_> = registry.get_all().into_iter().map(|c| (c.id, c.port)).collect();
        let fs = MockFileSystem::new();
        let bytes = serde_json::to_vec(&serde_json::json!({
            "version": "1.0.0",
            "clients": registry.get_all(),
        })).expect("serializes");
        fs.add_file("/reload/clients.json", bytes);
        let reloaded = ClientRegistry::load_all("/reload/clients.json", Arc::new(fs))
            .expect("persisted registry reloads");
        let after: Vec<_> = reloaded.get_all().into_iter().map(|c| (c.id, c.port)).collect();
        prop_assert_eq!(in_memory, after);
    }

    #[test]
    fn next_available_port_is_free_and_minimal(
        used in proptest::collection::btree_set(3001u16..3040, 0..20),
        floor in 3001u16..3030,
    ) {
        let registry = fresh_registry();
        for (i, port) in used.iter().enumerate() {
            registry.add(NewClientBuilder::new(&format!("c{i}"), *port).build()).expect("valid client");
        }

        let port = registry.next_available_port(floor).expect("range not exhausted");
        prop_assert!(port >= floor);
        prop_assert!(!used.contains(&port));
        prop_assert!((floor..port).all(|p| used.contains(&p)));
    }

    #[test]
    fn restarts_never_exceed_the_budget(
        max_attempts in 0u32..6,
        base_ms in 1u64..1000,
        crashes in 1usize..12,
    ) {
        let policy = RestartPolicy {
            max_attempts,
            base_delay: Duration::from_millis(base_ms),
        };
        let crash = WorkerExit::code(1);

        let mut attempts = 0;
        let mut restarts = 0;
        let mut gave_up = false;
        for _ in 0..crashes {
            match decide_exit(&crash, attempts, &policy, false) {
                ExitDecision::Restart { attempt, delay } => {
                    prop_assert!(!gave_up);
                    prop_assert_eq!(attempt, attempts + 1);
                    prop_assert_eq!(delay, Duration::from_millis(base_ms * u64::from(attempt)));
                    attempts = attempt;
                    restarts += 1;
                }
                ExitDecision::GiveUp { .. } => {
                    gave_up = true;
                    break;
                }
                ExitDecision::Stay => prop_assert!(false, "a crash is never ignored"),
            }
        }

        prop_assert!(restarts <= max_attempts);
        prop_assert_eq!(gave_up, crashes > max_attempts as usize);
        prop_assert_eq!(decide_exit(&crash, attempts, &policy, true), ExitDecision::Stay);
    }

    #[test]
    fn arbitrary_stdout_lines_never_panic(line in ".{0,200}") {
        match parse_line(&line) {
            Line::Output(text) => prop_assert_eq!(text, line),
            Line::Message { .. } | Line::Malformed(_) => {
                prop_assert!(
                    line.trim_start().starts_with('{'),
                    "line {:?} parsed as a message but does not open a JSON object",
                    line
                );
            }
        }
    }
}
