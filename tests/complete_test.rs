// ==========================================
// 工单完工集成测试
// ==========================================
// 测试范围:
// 1. 完工关闭未结束任务（进行中/暂停 → completed, 未开工 → cancelled）
// 2. 完工释放占用,工人可继续做其他工单
// 3. 完工晋级被释放工人的队首
// ==========================================


use chrono::Duration;
use production_execution::domain::plan::MaterialInput;
use production_execution::domain::types::{AssignmentStatus, ProductionState, ReservationStatus, SchedulingMode};
use production_execution::repository::StockRepository;
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

use test_helpers::*;

fn seed_two_cut_orders(conn: &Arc<Mutex<Connection>>) {
    seed_standard_master_data(conn);
    for code in ["A", "B"] {
        insert_work_order_with_plan(
            conn,
            &format!("WO-{}", code),
            &format!("P-{}", code),
            1.0,
            SchedulingMode::Fifo,
            vec![node("A", "OP-CUT", &[])],
        );
    }
}

#[test]
fn test_complete_closes_in_progress_task_and_frees_worker() {
    let (_tmp, _path, conn) = setup_test_db();
    seed_two_cut_orders(&conn);
    let (sm, clock) = state_machine_with_clock(&conn);

    sm.launch("P-A", "WO-A", "planner").unwrap();
    let a_id = sm.plan_assignments("P-A").unwrap()[0].assignment_id.clone();
    sm.start_task(&a_id, "worker").unwrap();

    clock.advance(Duration::minutes(25));
    let outcome = sm.complete("WO-A", "supervisor").unwrap();
    assert_eq!(outcome.closed_assignments, 1);

    let a = &sm.plan_assignments("P-A").unwrap()[0];
    assert_eq!(a.status, AssignmentStatus::Completed);
    assert_eq!(a.actual_end, Some(base_time() + Duration::minutes(25)));
    assert!(a.invariant_violation().is_none());
    assert_eq!(count_rows(&conn, "worker_occupancy"), 0);
    assert_eq!(count_rows(&conn, "substation_occupancy"), 0);

    // 工人可以继续做下一张工单
    sm.launch("P-B", "WO-B", "planner").unwrap();
    let b = sm.plan_assignments("P-B").unwrap().remove(0);
    assert_eq!(b.status, AssignmentStatus::Ready);
    let started = sm.start_task(&b.assignment_id, "worker").unwrap().assignment;
    assert_eq!(started.status, AssignmentStatus::InProgress);
}

#[test]
fn test_complete_cancels_unstarted_tasks_and_promotes_next_work_order() {
    let (_tmp, _path, conn) = setup_test_db();
    seed_two_cut_orders(&conn);
    let (sm, _clock) = state_machine_with_clock(&conn);

    sm.launch("P-A", "WO-A", "planner").unwrap();
    sm.launch("P-B", "WO-B", "planner").unwrap();
    let b = sm.plan_assignments("P-B").unwrap().remove(0);
    assert_eq!(b.status, AssignmentStatus::Queued);

    let outcome = sm.complete("WO-A", "supervisor").unwrap();
    assert_eq!(outcome.closed_assignments, 1);
    assert_eq!(outcome.promoted, vec![b.assignment_id.clone()]);

    let a = &sm.plan_assignments("P-A").unwrap()[0];
    assert_eq!(a.status, AssignmentStatus::Cancelled);
    assert!(a.actual_start.is_none());
    assert!(a.actual_end.is_none());

    let head = sm.next_task("W-CUT", SchedulingMode::Fifo).unwrap().unwrap();
    assert_eq!(head.assignment_id, b.assignment_id);
    assert_eq!(head.status, AssignmentStatus::Ready);
    sm.start_task(&b.assignment_id, "worker").unwrap();
}

#[test]
fn test_complete_of_paused_work_order_closes_open_pause() {
    let (_tmp, _path, conn) = setup_test_db();
    seed_two_cut_orders(&conn);
    let (sm, clock) = state_machine_with_clock(&conn);

    sm.launch("P-A", "WO-A", "planner").unwrap();
    let a_id = sm.plan_assignments("P-A").unwrap()[0].assignment_id.clone();
    sm.start_task(&a_id, "worker").unwrap();
    clock.advance(Duration::minutes(10));
    sm.pause("P-A", "supervisor").unwrap();
    clock.advance(Duration::minutes(4));

    sm.complete("WO-A", "supervisor").unwrap();

    let a = &sm.plan_assignments("P-A").unwrap()[0];
    assert_eq!(a.status, AssignmentStatus::Completed);
    assert!(a.current_pause_start.is_none());
    assert_eq!(a.total_paused_time, Duration::minutes(4).num_milliseconds());
    let effective = sm.effective_duration(&a_id).unwrap().unwrap();
    assert_eq!(effective.millis, Duration::minutes(10).num_milliseconds());
    assert_eq!(
        sm.work_order_status("WO-A").unwrap().production_state,
        ProductionState::Completed
    );
}

#[test]
fn test_complete_consumes_reservations() {
    let (_tmp, _path, conn) = setup_test_db();
    seed_standard_master_data(&conn);
    insert_stock(&conn, "M-1", 10.0);
    insert_work_order_with_plan(
        &conn,
        "WO-A",
        "P-A",
        5.0,
        SchedulingMode::Fifo,
        vec![node_with_inputs("A", "OP-CUT", &[], vec![MaterialInput::new("M-1", 4.0)])],
    );
    let (sm, _clock) = state_machine_with_clock(&conn);
    sm.launch("P-A", "WO-A", "planner").unwrap();

    let outcome = sm.complete("WO-A", "supervisor").unwrap();
    assert!((outcome.consumed_materials.input_materials[0].consumed - 4.0).abs() < 1e-9);
    assert_eq!(stock_row(&conn, "M-1"), (6.0, 0.0));
    let reservations = StockRepository::new(conn.clone()).reservations_for_plan("P-A").unwrap();
    assert_eq!(reservations[0].status, ReservationStatus::Consumed);

    // 终态之后不再接受完工
    assert_eq!(
        sm.complete("WO-A", "supervisor").unwrap_err().code(),
        "INVALID_STATE_TRANSITION"
    );
}
