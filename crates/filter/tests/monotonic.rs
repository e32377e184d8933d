use scry_core::record::{Task, TaskState, TaskType};
use scry_core::{Predicate, Record};
use scry_filter::{matches, parse_filters, retain_matching};

fn tasks(n: usize) -> Vec<Record> {
    let states = [TaskState::Running, TaskState::Finished, TaskState::Failed];
    (0..n)
        .map(|i| {
            Record::Task(Task {
                task_id: format!("t{:04}", i),
                name: format!("f{}", i % 5),
                func_or_class_name: None,
                task_type: if i % 7 == 0 { TaskType::ActorTask } else { TaskType::NormalTask },
                state: states[i % states.len()],
                job_id: Some(format!("{:08}", i % 2)),
                actor_id: None,
                node_id: if i % 4 == 0 { None } else { Some(format!("n{}", i % 3)) },
                worker_id: None,
                details: None,
            })
        })
        .collect()
}

#[test]
fn adding_a_predicate_never_grows_the_result() {
    let base = tasks(300);
    let candidates = [
        "state=RUNNING",
        "state!=FAILED",
        "name=f3",
        "node_id!=n1",
        "task_type=ACTOR_TASK",
        "job_id=00000001",
        "no_such_field!=x",
    ];
    let mut prev = base.len();
    let mut applied: Vec<Predicate> = Vec::new();
    for c in candidates {
        applied.extend(parse_filters(&[c]).unwrap());
        let n = base.iter().filter(|r| matches(r, &applied)).count();
        assert!(n <= prev, "{c} grew result from {prev} to {n}");
        prev = n;
    }
    // the unknown field at the end empties everything
    assert_eq!(prev, 0);
}

#[test]
fn retain_keeps_relative_order() {
    let mut recs = tasks(50);
    let fs = parse_filters(&["state=FINISHED"]).unwrap();
    let dropped = retain_matching(&mut recs, &fs);
    assert_eq!(dropped + recs.len(), 50);
    let ids: Vec<&str> = recs.iter().map(|r| r.id()).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
    assert!(recs.iter().all(|r| r.state() == "FINISHED"));
}

#[test]
fn unset_node_excluded_by_both_operators() {
    let recs = tasks(8);
    let eq = parse_filters(&["node_id=n1"]).unwrap();
    let ne = parse_filters(&["node_id!=n1"]).unwrap();
    let unset = recs.iter().filter(|r| r.node_id().is_none()).count();
    let hit_eq = recs.iter().filter(|r| matches(r, &eq)).count();
    let hit_ne = recs.iter().filter(|r| matches(r, &ne)).count();
    assert_eq!(hit_eq + hit_ne + unset, recs.len());
}
