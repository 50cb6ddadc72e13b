use std::os::fd::AsRawFd;
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::time::{Duration, Instant};

use assert_cmd::Command;
use nix::pty::{openpty, Winsize};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

fn ptyjig() -> Command {
    let mut cmd = Command::cargo_bin("ptyjig").unwrap();
    // Keep tests independent of whatever config the host user has.
    cmd.arg("--config").arg("/nonexistent/ptyjig.toml");
    cmd.timeout(Duration::from_secs(30));
    cmd
}

#[test]
fn exit_status_is_passed_through() {
    ptyjig()
        .args(["-t", "1", "sh", "-c", "exit 7"])
        .write_stdin("")
        .assert()
        .code(7);
}

#[test]
fn clean_exit_is_zero() {
    ptyjig()
        .args(["-t", "1", "true"])
        .write_stdin("")
        .assert()
        .success();
}

#[test]
fn segfault_is_reported_with_signal_code() {
    let output = ptyjig()
        .args(["-t", "1", "sh", "-c", "kill -SEGV $$"])
        .write_stdin("")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(139));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ptyjig: sh: Segmentation fault"), "stdout: {stdout}");
}

#[test]
fn input_capture_translates_carriage_returns() {
    let dir = tempfile::tempdir().unwrap();
    let capture = dir.path().join("keys");

    ptyjig()
        .arg("-x")
        .arg("-e")
        .arg("-i")
        .arg(&capture)
        .args(["-t", "1", "cat"])
        .write_stdin("a\rb\rc\n")
        .assert()
        .code(137);

    assert_eq!(std::fs::read(&capture).unwrap(), b"a\nb\nc\n");
}

#[test]
fn echoing_command_shows_every_byte_twice() {
    let dir = tempfile::tempdir().unwrap();
    let capture = dir.path().join("out");

    ptyjig()
        .arg("-x")
        .arg("-e")
        .arg("-o")
        .arg(&capture)
        .args(["-t", "1", "cat"])
        .write_stdin("xyz")
        .assert()
        .code(137);

    let out = std::fs::read(&capture).unwrap();
    for byte in b"xyz" {
        assert_eq!(out.iter().filter(|&&b| b == *byte).count(), 2, "output {out:?}");
    }
}

#[test]
fn mirror_copies_output_to_stdout() {
    let output = ptyjig()
        .args(["-t", "1", "sh", "-c", "echo hello-from-pty"])
        .write_stdin("")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stdout).contains("hello-from-pty"));
}

#[test]
fn no_mirror_keeps_stdout_quiet() {
    let output = ptyjig()
        .args(["-x", "-t", "1", "sh", "-c", "echo hello-from-pty"])
        .write_stdin("")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));
    assert!(!String::from_utf8_lossy(&output.stdout).contains("hello-from-pty"));
}

#[test]
fn silent_command_is_killed_after_idle_timeout() {
    let started = Instant::now();
    ptyjig()
        .args(["-x", "-t", "1", "sleep", "30"])
        .write_stdin("")
        .assert()
        .code(137);
    // timeout + grace period + slack
    assert!(started.elapsed() < Duration::from_secs(8));
}

#[test]
fn steady_output_keeps_the_session_alive() {
    ptyjig()
        .args([
            "-x",
            "-t",
            "2",
            "sh",
            "-c",
            "for i in 1 2 3 4 5 6; do echo tick; sleep 0.5; done",
        ])
        .write_stdin("")
        .assert()
        .code(0);
}

#[test]
fn unknown_command_exits_one_and_names_it() {
    let output = ptyjig()
        .args(["-t", "1", "ptyjig-no-such-command"])
        .write_stdin("")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ptyjig-no-such-command"), "stderr: {stderr}");
}

#[test]
fn missing_command_is_a_usage_error() {
    ptyjig().write_stdin("").assert().code(1);
}

#[test]
fn unwritable_capture_path_fails_before_running() {
    let output = ptyjig()
        .args(["-o", "/nonexistent-dir/out", "true"])
        .write_stdin("")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("ptyjig:"));
}

#[test]
fn negative_delay_is_rejected() {
    ptyjig()
        .args(["-d", "-1", "true"])
        .write_stdin("")
        .assert()
        .code(1);
}

#[test]
fn config_file_settings_apply() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "[session]\nmirror_output = false\n").unwrap();

    let output = Command::cargo_bin("ptyjig")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .args(["-t", "1", "sh", "-c", "echo hidden-by-config"])
        .write_stdin("")
        .timeout(Duration::from_secs(30))
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));
    assert!(!String::from_utf8_lossy(&output.stdout).contains("hidden-by-config"));
}

#[test]
fn huge_idle_timeout_behaves_as_no_timeout() {
    let output = ptyjig()
        .args([
            "-t",
            "18446744073709551615",
            "sh",
            "-c",
            "sleep 1; echo after-drain; exit 4",
        ])
        .write_stdin("")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));
    assert!(String::from_utf8_lossy(&output.stdout).contains("after-drain"));
}

fn harness(args: &[&str]) -> std::process::Command {
    let mut cmd = std::process::Command::new(assert_cmd::cargo::cargo_bin("ptyjig"));
    cmd.args(["--config", "/nonexistent/ptyjig.toml"]).args(args);
    cmd
}

fn send(pid: u32, signal: Signal) {
    signal::kill(Pid::from_raw(pid as i32), signal).unwrap();
}

/// Gone, or a zombie waiting for init to reap it.
fn process_gone(pid: i32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat.contains(") Z "),
        Err(_) => signal::kill(Pid::from_raw(pid), None).is_err(),
    }
}

#[test]
fn repeated_termination_signals_end_the_harness_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let pidfile = dir.path().join("bg.pid");
    let script = format!("sleep 30 & echo $! > {}; wait", pidfile.display());

    let mut child = harness(&["-x", "-t", "0", "sh", "-c", &script])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .spawn()
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    let background: i32 = loop {
        if let Ok(pid) = std::fs::read_to_string(&pidfile).unwrap_or_default().trim().parse() {
            break pid;
        }
        assert!(Instant::now() < deadline, "background pid never recorded");
        std::thread::sleep(Duration::from_millis(20));
    };

    for _ in 0..2 {
        send(child.id(), Signal::SIGTERM);
        std::thread::sleep(Duration::from_millis(50));
    }

    let started = Instant::now();
    let status = child.wait().unwrap();
    assert_eq!(status.signal(), Some(15));
    assert!(started.elapsed() < Duration::from_secs(5));

    let deadline = Instant::now() + Duration::from_secs(3);
    while !process_gone(background) {
        assert!(Instant::now() < deadline, "group member {background} survived teardown");
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn window_change_reaches_the_command() {
    let winsize = |rows, cols| Winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // Stands in for the terminal the harness is started from.
    let term = openpty(Some(&winsize(24, 80)), None).unwrap();

    let child = harness(&["-t", "0", "sh", "-c", "sleep 1.5; stty size"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::from(term.slave))
        .spawn()
        .unwrap();
    std::thread::sleep(Duration::from_millis(500));

    let size = winsize(50, 132);
    // Safety: master is an open pty and size outlives the call.
    let rc = unsafe {
        libc::ioctl(
            term.master.as_raw_fd(),
            libc::TIOCSWINSZ,
            &size as *const Winsize,
        )
    };
    assert_eq!(rc, 0);
    send(child.id(), Signal::SIGWINCH);

    let output = child.wait_with_output().unwrap();
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("50 132"), "stdout: {stdout}");
}
