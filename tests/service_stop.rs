use std::path::Path;
use std::sync::Arc;

use stackd::fs::mock::MockFileSystem;
use stackd::service::{pid_file_path, ServiceManager, StopOutcome};
use stackd::state::{Password, SharedState};
use stackd::types::ServiceType;
use stackd_test_utils::builders::StateBuilder;
use stackd_test_utils::fake_services::{
    test_filter, ElevatedCommand, RecordingElevator, ScriptedProcessTable,
};
use stackd_test_utils::init_tracing;

const HOSTS: &str = "/etc/hosts";

fn manager(
    fs: &MockFileSystem,
    table: ScriptedProcessTable,
    elevator: &RecordingElevator,
) -> ServiceManager {
    init_tracing();
    ServiceManager::new(
        Arc::new(fs.clone()),
        Arc::new(table),
        Arc::new(elevator.clone()),
        test_filter(),
    )
}

fn state() -> SharedState {
    StateBuilder::new("/srv/stackd").password("s3cret").build()
}

fn outcome_of(outcomes: &[(ServiceType, StopOutcome)], service: ServiceType) -> &StopOutcome {
    &outcomes
        .iter()
        .find(|(s, _)| *s == service)
        .expect("every service has an outcome")
        .1
}

#[test]
fn pid_file_gates_the_attempt_but_the_process_table_picks_the_pids() {
    let fs = MockFileSystem::new();
    let state = state();
    fs.add_file(pid_file_path(&state, ServiceType::Nginx), "999");
    let elevator = RecordingElevator::new();
    let table = ScriptedProcessTable::with(&[
        (200, "nginx: master process /srv/stackd/server/nginx/sbin/nginx"),
        (201, "nginx: worker process"),
        (300, "grep nginx"),
    ]);

    let outcome = manager(&fs, table, &elevator).stop_service_by_pid_file(
        &pid_file_path(&state, ServiceType::Nginx),
        ServiceType::Nginx,
        state.password.as_ref(),
    );

    assert_eq!(
        outcome,
        StopOutcome::Signalled {
            command: "kill -INT 200 201".to_string(),
            pids: vec![200, 201],
        }
    );
    assert_eq!(
        elevator.runs(),
        vec![ElevatedCommand {
            password: Some("s3cret".to_string()),
            command: "kill -INT 200 201".to_string(),
        }]
    );
}

#[test]
fn missing_pid_file_means_nothing_is_queried() {
    let fs = MockFileSystem::new();
    let elevator = RecordingElevator::new();
    let table = ScriptedProcessTable::failing("ps must not be called");

    let outcome = manager(&fs, table, &elevator).stop_service_by_pid_file(
        Path::new("/srv/stackd/server/mysql/mysql.pid"),
        ServiceType::Mysql,
        None,
    );
    assert_eq!(outcome, StopOutcome::NoPidFile);
    assert!(elevator.runs().is_empty());
}

#[test]
fn php_is_stopped_without_a_pid_file() {
    let fs = MockFileSystem::new();
    let elevator = RecordingElevator::new();
    let table = ScriptedProcessTable::with(&[(77, "php-fpm: master process (/srv/php-fpm.conf)")]);

    let outcome = manager(&fs, table, &elevator).stop_service_by_pid_file(
        Path::new("/nowhere/php-fpm.pid"),
        ServiceType::Php,
        None,
    );
    assert_eq!(
        outcome,
        StopOutcome::Signalled {
            command: "kill -INT 77".to_string(),
            pids: vec![77],
        }
    );
    assert_eq!(elevator.runs()[0].password, None);
}

#[test]
fn database_family_gets_sigterm() {
    let fs = MockFileSystem::new();
    let state = state();
    fs.add_file(pid_file_path(&state, ServiceType::Mariadb), "1");
    let elevator = RecordingElevator::new();
    let table = ScriptedProcessTable::with(&[(55, "/srv/stackd/server/mariadb/bin/mariadbd --port=3306")]);

    let outcome = manager(&fs, table, &elevator).stop_service_by_pid_file(
        &pid_file_path(&state, ServiceType::Mariadb),
        ServiceType::Mariadb,
        state.password.as_ref(),
    );
    assert!(matches!(outcome, StopOutcome::Signalled { ref command, .. } if command == "kill -TERM 55"));
}

#[test]
fn elevation_failure_is_reported_not_raised() {
    let fs = MockFileSystem::new();
    let elevator = RecordingElevator::new();
    elevator.fail_runs();
    let table = ScriptedProcessTable::with(&[(77, "php-fpm: master process")]);

    let outcome = manager(&fs, table, &elevator).stop_service_by_pid_file(
        Path::new("/nowhere"),
        ServiceType::Php,
        Some(&Password::new("wrong")),
    );
    match outcome {
        StopOutcome::Failed { command, reason } => {
            assert_eq!(command.as_deref(), Some("kill -INT 77"));
            assert!(reason.contains("refused"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[test]
fn stop_all_covers_every_service_and_cleans_hosts() {
    let fs = MockFileSystem::new();
    let state = state();
    fs.add_file(pid_file_path(&state, ServiceType::Redis), "1");
    fs.add_file(
        HOSTS,
        "127.0.0.1 localhost\n#X-HOSTS-BEGIN#\n127.0.0.1 shop.test\n#X-HOSTS-END#\n",
    );
    let elevator = RecordingElevator::new();
    let table = ScriptedProcessTable::with(&[
        (400, "/srv/stackd/server/redis/bin/redis-server *:6379"),
        (401, "/Applications/Stack.app/Contents/MacOS/redis-server"),
    ]);

    let outcomes = manager(&fs, table, &elevator).stop_all(&state, Path::new(HOSTS));

    assert_eq!(outcomes.len(), ServiceType::ALL.len());
    assert_eq!(
        outcome_of(&outcomes, ServiceType::Redis),
        &StopOutcome::Signalled {
            command: "kill -INT 400".to_string(),
            pids: vec![400],
        }
    );
    assert_eq!(outcome_of(&outcomes, ServiceType::Nginx), &StopOutcome::NoPidFile);
    assert_eq!(outcome_of(&outcomes, ServiceType::Php), &StopOutcome::NoProcesses);
    assert_eq!(
        String::from_utf8(fs.contents(HOSTS).unwrap()).unwrap(),
        "127.0.0.1 localhost\n\n"
    );
}

#[test]
fn hosts_file_without_block_is_left_alone() {
    let fs = MockFileSystem::new();
    fs.add_file(HOSTS, "127.0.0.1 localhost\n");
    let m = manager(&fs, ScriptedProcessTable::with(&[]), &RecordingElevator::new());

    assert!(!m.clean_hosts_file(Path::new(HOSTS)).unwrap());
    assert!(!m.clean_hosts_file(Path::new("/missing/hosts")).unwrap());
    assert_eq!(fs.contents(HOSTS).unwrap(), b"127.0.0.1 localhost\n".to_vec());
}

#[test]
fn password_verification_goes_through_the_elevator() {
    let fs = MockFileSystem::new();
    let m = manager(
        &fs,
        ScriptedProcessTable::with(&[]),
        &RecordingElevator::accepting("open sesame"),
    );
    assert!(m.verify_password(&Password::new("open sesame")).is_ok());
    assert!(m.verify_password(&Password::new("nope")).is_err());
}
