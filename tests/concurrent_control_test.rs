// ==========================================
// 并发控制测试
// ==========================================
// 职责: 验证 IMMEDIATE 事务 + 条件更新下的并发迁移
// 1. 同一工人的两个任务并发开工: 恰好一个成功
// 2. 同一任务并发开工: 恰好一个成功
// 3. 暂停与取消并发: 终态一致
// ==========================================


#[cfg(test)]
mod concurrent_control_test {
    use production_execution::config::ExecutionConfig;
    use production_execution::domain::material::CancellationProgress;
    use production_execution::domain::types::{AssignmentStatus, ProductionState, SchedulingMode};
    use production_execution::engine::WorkOrderStateMachine;
    use rusqlite::Connection;
    use std::sync::{Arc, Barrier, Mutex};
    use std::thread;

    use crate::test_helpers::*;

    // ==========================================
    // 测试辅助函数
    // ==========================================

    /// 每个线程独立连接同一数据库文件
    fn thread_state_machine(db_path: &str) -> WorkOrderStateMachine {
        let conn = open_test_connection(db_path).expect("打开数据库失败");
        WorkOrderStateMachine::with_config(Arc::new(Mutex::new(conn)), ExecutionConfig::default())
    }

    fn seed_two_urgent_orders(conn: &Arc<Mutex<Connection>>) {
        seed_standard_master_data(conn);
        for i in 1..=2 {
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

    fn in_progress_count(conn: &Arc<Mutex<Connection>>, worker_id: &str) -> i64 {
        conn.lock()
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM worker_assignment WHERE worker_id = ?1 AND status = 'in_progress'",
                [worker_id],
                |row| row.get(0),
            )
            .unwrap()
    }

    // ==========================================
    // 测试用例
    // ==========================================

    #[test]
    fn test_concurrent_starts_on_same_worker() {
        let (_tmp, db_path, conn) = setup_test_db();
        seed_two_urgent_orders(&conn);
        let sm = thread_state_machine(&db_path);
        for i in 1..=2 {
            sm.set_urgent_priority(&format!("WO-{}", i), true, "dispatcher").unwrap();
            sm.launch(&format!("P-{}", i), &format!("WO-{}", i), "planner").unwrap();
        }
        let ids: Vec<String> = (1..=2)
            .map(|i| sm.plan_assignments(&format!("P-{}", i)).unwrap()[0].assignment_id.clone())
            .collect();

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = ids
            .into_iter()
            .map(|id| {
                let barrier = barrier.clone();
                let path = db_path.clone();
                thread::spawn(move || {
                    let sm = thread_state_machine(&path);
                    barrier.wait();
                    sm.start_task(&id, "worker").map(|_| ()).map_err(|e| e.code())
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let ok = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(ok, 1, "结果: {:?}", results);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|code| *code == "ASSIGNMENT_CONFLICT"));
        assert_eq!(in_progress_count(&conn, "W-CUT"), 1);
        assert_eq!(count_rows(&conn, "worker_occupancy"), 1);
    }

    #[test]
    fn test_concurrent_starts_on_same_assignment() {
        let (_tmp, db_path, conn) = setup_test_db();
        seed_two_urgent_orders(&conn);
        let sm = thread_state_machine(&db_path);
        sm.launch("P-1", "WO-1", "planner").unwrap();
        let id = sm.plan_assignments("P-1").unwrap()[0].assignment_id.clone();

        let barrier = Arc::new(Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let barrier = barrier.clone();
                let path = db_path.clone();
                let id = id.clone();
                thread::spawn(move || {
                    let sm = thread_state_machine(&path);
                    barrier.wait();
                    sm.start_task(&id, "worker").is_ok()
                })
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(successes, 1);
        let a = &sm.plan_assignments("P-1").unwrap()[0];
        assert_eq!(a.status, AssignmentStatus::InProgress);
        // 恰好一条开工日志
        let logs = sm.action_log("WO-1").unwrap();
        assert_eq!(
            logs.iter()
                .filter(|l| l.action_type == production_execution::domain::ActionType::StartTask)
                .count(),
            1
        );
    }

    #[test]
    fn test_concurrent_pause_and_cancel_converge_to_cancelled() {
        let (_tmp, db_path, conn) = setup_test_db();
        seed_two_urgent_orders(&conn);
        let sm = thread_state_machine(&db_path);
        sm.launch("P-1", "WO-1", "planner").unwrap();
        let id = sm.plan_assignments("P-1").unwrap()[0].assignment_id.clone();
        sm.start_task(&id, "worker").unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let pause = {
            let barrier = barrier.clone();
            let path = db_path.clone();
            thread::spawn(move || {
                let sm = thread_state_machine(&path);
                barrier.wait();
                sm.pause("P-1", "supervisor").is_ok()
            })
        };
        let cancel = {
            let barrier = barrier.clone();
            let path = db_path.clone();
            thread::spawn(move || {
                let sm = thread_state_machine(&path);
                barrier.wait();
                sm.cancel_with_progress(
                    "P-1",
                    CancellationProgress {
                        actual_output_quantity: 0.0,
                        defect_quantity: 0.0,
                    },
                    "supervisor",
                )
                .is_ok()
            })
        };
        let _paused = pause.join().unwrap();
        let cancelled = cancel.join().unwrap();

        assert!(cancelled, "取消在任何非终态下都应成功");
        assert_eq!(
            sm.work_order_status("WO-1").unwrap().production_state,
            ProductionState::Cancelled
        );
        let a = &sm.plan_assignments("P-1").unwrap()[0];
        assert_eq!(a.status, AssignmentStatus::Cancelled);
        assert!(a.current_pause_start.is_none());
        assert_eq!(count_rows(&conn, "worker_occupancy"), 0);
    }
}
