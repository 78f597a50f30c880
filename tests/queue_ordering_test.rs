// ==========================================
// 工人队列排序集成测试
// ==========================================
// 测试范围:
// 1. FIFO: 加急优先,expected_start 非递减
// 2. 非加急工单只能从队首开工
// 3. 优化模式: optimized_index 严格递增,序号跨工单接续
// 4. 加急标志同步到未结束任务
// ==========================================


use chrono::Duration;
use production_execution::api::WorkerApi;
use production_execution::domain::types::{AssignmentStatus, SchedulingMode};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

use test_helpers::*;

/// 三张单节点工单,同一名切割工人
fn seed_three_cut_orders(conn: &Arc<Mutex<Connection>>) {
    seed_standard_master_data(conn);
    for i in 1..=3 {
        insert_work_order_with_plan(
            conn,
            &format!("WO-{}", i),
            &format!("P-{}", i),
            1.0,
            SchedulingMode::Fifo,
            vec![node("A", "OP-CUT", &[])],
        );
    }
}

/// 单工人多工序（优化模式）
fn seed_generalist(conn: &Arc<Mutex<Connection>>) {
    insert_operation(conn, "OP-L", 50.0, &["gen"]);
    insert_operation(conn, "OP-M", 20.0, &["gen"]);
    insert_operation(conn, "OP-S", 10.0, &["gen"]);
    insert_worker(conn, "W-1", &["gen"], 1.0);
    insert_station(conn, "ST-G", &["OP-L", "OP-M", "OP-S"], &["ST-G-1", "ST-G-2"]);
}

#[test]
fn test_fifo_queue_is_ordered_by_expected_start() {
    let (_tmp, _path, conn) = setup_test_db();
    seed_three_cut_orders(&conn);
    let (sm, _clock) = state_machine_with_clock(&conn);
    for i in 1..=3 {
        sm.launch(&format!("P-{}", i), &format!("WO-{}", i), "planner").unwrap();
    }

    let queue = sm.worker_queue("W-CUT", SchedulingMode::Fifo).unwrap();
    let orders: Vec<&str> = queue.iter().map(|a| a.work_order_code.as_str()).collect();
    assert_eq!(orders, vec!["WO-1", "WO-2", "WO-3"]);
    assert!(queue.windows(2).all(|w| w[0].expected_start <= w[1].expected_start));

    // 后续任务排在前一任务计划完工之后
    assert_eq!(queue[1].expected_start, queue[0].planned_end);
    assert_eq!(queue[2].expected_start, base_time() + Duration::minutes(60));

    assert_eq!(queue[0].status, AssignmentStatus::Ready);
    assert_eq!(queue[1].status, AssignmentStatus::Queued);
    assert_eq!(queue[2].status, AssignmentStatus::Queued);
}

#[test]
fn test_urgent_work_order_jumps_the_queue() {
    let (_tmp, _path, conn) = setup_test_db();
    seed_three_cut_orders(&conn);
    let (sm, _clock) = state_machine_with_clock(&conn);
    for i in 1..=3 {
        sm.launch(&format!("P-{}", i), &format!("WO-{}", i), "planner").unwrap();
    }

    let ack = sm.set_urgent_priority("WO-3", true, "dispatcher").unwrap();
    assert!(ack.is_urgent);
    assert_eq!(ack.updated_assignments, 1);

    let queue = sm.worker_queue("W-CUT", SchedulingMode::Fifo).unwrap();
    assert_eq!(queue[0].work_order_code, "WO-3");
    assert!(queue[0].is_urgent);
    // 非加急部分仍按 expected_start 排序
    assert_eq!(queue[1].work_order_code, "WO-1");
    assert_eq!(queue[2].work_order_code, "WO-2");

    // 取消加急后恢复原顺序
    sm.set_urgent_priority("WO-3", false, "dispatcher").unwrap();
    let head = sm.next_task("W-CUT", SchedulingMode::Fifo).unwrap().unwrap();
    assert_eq!(head.work_order_code, "WO-1");
}

#[test]
fn test_non_urgent_task_must_be_queue_head() {
    let (_tmp, _path, conn) = setup_test_db();
    seed_three_cut_orders(&conn);
    let (sm, _clock) = state_machine_with_clock(&conn);
    for i in 1..=3 {
        sm.launch(&format!("P-{}", i), &format!("WO-{}", i), "planner").unwrap();
    }
    let second = sm.plan_assignments("P-2").unwrap().remove(0);

    let err = sm.start_task(&second.assignment_id, "worker").unwrap_err();
    assert_eq!(err.code(), "ASSIGNMENT_CONFLICT");
    assert_eq!(
        sm.plan_assignments("P-2").unwrap()[0].status,
        AssignmentStatus::Queued
    );
}

#[test]
fn test_urgent_task_may_start_early_and_pulls_expected_start_back() {
    let (_tmp, _path, conn) = setup_test_db();
    seed_three_cut_orders(&conn);
    let (sm, _clock) = state_machine_with_clock(&conn);
    for i in 1..=3 {
        sm.launch(&format!("P-{}", i), &format!("WO-{}", i), "planner").unwrap();
    }
    sm.set_urgent_priority("WO-3", true, "dispatcher").unwrap();
    let third = sm.plan_assignments("P-3").unwrap().remove(0);
    assert!(third.expected_start > base_time());

    let started = sm.start_task(&third.assignment_id, "worker").unwrap().assignment;
    assert_eq!(started.status, AssignmentStatus::InProgress);
    assert_eq!(started.actual_start, Some(base_time()));
    assert_eq!(started.expected_start, base_time());
    assert_eq!(started.planned_end, base_time() + Duration::minutes(30));
    assert!(started.invariant_violation().is_none());

    // 工人已在工作,队首任务暂不能开工
    let first = sm.plan_assignments("P-1").unwrap().remove(0);
    assert_eq!(sm.start_task(&first.assignment_id, "worker").unwrap_err().code(), "ASSIGNMENT_CONFLICT");
}

#[test]
fn test_urgency_set_before_launch_reaches_new_assignments() {
    let (_tmp, _path, conn) = setup_test_db();
    seed_three_cut_orders(&conn);
    let (sm, _clock) = state_machine_with_clock(&conn);

    let ack = sm.set_urgent_priority("WO-2", true, "dispatcher").unwrap();
    assert_eq!(ack.updated_assignments, 0);

    sm.launch("P-1", "WO-1", "planner").unwrap();
    sm.launch("P-2", "WO-2", "planner").unwrap();
    let a = sm.plan_assignments("P-2").unwrap().remove(0);
    assert!(a.is_urgent);

    let head = sm.next_task("W-CUT", SchedulingMode::Fifo).unwrap().unwrap();
    assert_eq!(head.work_order_code, "WO-2");
    assert!(sm.work_order_status("WO-2").unwrap().is_urgent);
}

#[test]
fn test_optimized_indices_are_strictly_increasing() {
    let (_tmp, _path, conn) = setup_test_db();
    seed_generalist(&conn);
    insert_work_order_with_plan(
        &conn,
        "WO-OPT",
        "P-OPT",
        1.0,
        SchedulingMode::Optimized,
        vec![node("L", "OP-L", &[]), node("M", "OP-M", &[]), node("S", "OP-S", &[])],
    );
    let (sm, _clock) = state_machine_with_clock(&conn);

    sm.launch("P-OPT", "WO-OPT", "planner").unwrap();

    let queue = sm.worker_queue("W-1", SchedulingMode::Optimized).unwrap();
    let nodes: Vec<&str> = queue.iter().map(|a| a.node_id.as_str()).collect();
    // 最短加工时间优先
    assert_eq!(nodes, vec!["S", "M", "L"]);
    let indices: Vec<i64> = queue.iter().map(|a| a.optimized_index.unwrap()).collect();
    assert_eq!(indices, vec![1, 2, 3]);
    assert!(queue.windows(2).all(|w| w[0].expected_start < w[1].expected_start));
    assert!(queue.iter().all(|a| a.optimized_start == Some(a.expected_start)));
    assert_eq!(queue[0].status, AssignmentStatus::Ready);
    assert!(queue[1..].iter().all(|a| a.status == AssignmentStatus::Queued));

    // 优化任务不进入 FIFO 队列
    assert!(sm.worker_queue("W-1", SchedulingMode::Fifo).unwrap().is_empty());
}

#[test]
fn test_optimized_indices_continue_across_work_orders() {
    let (_tmp, _path, conn) = setup_test_db();
    seed_generalist(&conn);
    insert_work_order_with_plan(
        &conn,
        "WO-O1",
        "P-O1",
        1.0,
        SchedulingMode::Optimized,
        vec![node("M", "OP-M", &[]), node("S", "OP-S", &[])],
    );
    insert_work_order_with_plan(
        &conn,
        "WO-O2",
        "P-O2",
        1.0,
        SchedulingMode::Optimized,
        vec![node("L", "OP-L", &[])],
    );
    let (sm, _clock) = state_machine_with_clock(&conn);

    sm.launch("P-O1", "WO-O1", "planner").unwrap();
    sm.launch("P-O2", "WO-O2", "planner").unwrap();

    let queue = sm.worker_queue("W-1", SchedulingMode::Optimized).unwrap();
    let indices: Vec<i64> = queue.iter().map(|a| a.optimized_index.unwrap()).collect();
    assert_eq!(indices, vec![1, 2, 3]);
    assert_eq!(queue[2].work_order_code, "WO-O2");
    assert_eq!(queue[2].expected_start, queue[1].planned_end);
    assert_eq!(queue[2].status, AssignmentStatus::Queued);
}

#[test]
fn test_worker_api_renders_queue_views() {
    let (_tmp, _path, conn) = setup_test_db();
    seed_three_cut_orders(&conn);
    let (sm, _clock) = state_machine_with_clock(&conn);
    sm.launch("P-1", "WO-1", "planner").unwrap();
    sm.launch("P-2", "WO-2", "planner").unwrap();
    let api = WorkerApi::new(sm.clone());

    let views = api.worker_queue("W-CUT", "FIFO").unwrap();
    assert_eq!(views.len(), 2);
    assert_eq!(views[0].status, "ready");
    assert!(!views[0].status_label.is_empty());
    assert_ne!(views[0].status_label, "assignment_status.ready");

    let err = api.worker_queue("W-CUT", "lifo").unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
}
