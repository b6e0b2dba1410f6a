// Presence Server CLI
// Watches live presence traffic, simulates students, and validates server behaviour

use clap::{Parser, Subcommand};
use colored::*;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SocketWriter = SplitSink<Socket, Message>;
type SocketReader = SplitStream<Socket>;

#[derive(Parser)]
#[command(name = "presence-cli")]
#[command(about = "Exam Presence Server CLI", long_about = None)]
struct Cli {
    /// Server address (default: 127.0.0.1:5000)
    #[arg(short, long, default_value = "127.0.0.1:5000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health endpoint
    Health,

    /// Print the current list of online students
    Presence,

    /// Connect as an anonymous observer and print every broadcast
    Watch {
        /// Hide screen_mirror_update frames
        #[arg(long)]
        no_frames: bool,
    },

    /// Connect as a student, take a test, and submit it
    Simulate {
        /// Student id
        #[arg(short, long)]
        student_id: String,

        /// Display name
        #[arg(short, long)]
        name: Option<String>,

        /// Group code
        #[arg(short, long, default_value = "G1")]
        group: String,

        /// Test title
        #[arg(short, long, default_value = "Quiz")]
        test_title: String,

        /// Screen frames to send while testing
        #[arg(short, long, default_value_t = 3)]
        frames: u32,

        /// Score reported on submission
        #[arg(long, default_value_t = 80)]
        score: u32,
    },

    /// Post an activity record for relay to observers
    Activity {
        /// Activity type, e.g. student_login
        #[arg(short, long)]
        activity: String,

        /// User name shown with the activity
        #[arg(short, long)]
        user_name: Option<String>,

        /// Related test title
        #[arg(short, long)]
        test_title: Option<String>,
    },

    /// Run automated validation scenarios
    Validate {
        /// Run all validation tests
        #[arg(short, long)]
        all: bool,

        /// Test specific scenario
        #[arg(short, long)]
        scenario: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Health => check_health(&cli.server).await,
        Commands::Presence => show_presence(&cli.server).await,
        Commands::Watch { no_frames } => watch(&cli.server, *no_frames).await,
        Commands::Simulate {
            student_id,
            name,
            group,
            test_title,
            frames,
            score,
        } => {
            simulate(
                &cli.server,
                student_id,
                name.as_deref(),
                group,
                test_title,
                *frames,
                *score,
            )
            .await
        }
        Commands::Activity {
            activity,
            user_name,
            test_title,
        } => post_activity(&cli.server, activity, user_name.as_deref(), test_title.as_deref()).await,
        Commands::Validate { all, scenario } => {
            if *all {
                run_all_validations(&cli.server).await;
            } else if let Some(s) = scenario {
                run_scenario(&cli.server, s).await;
            } else {
                println!("{}", "Use --all or --scenario <name>".yellow());
                list_scenarios();
            }
        }
    }
}

fn socket_url(server: &str, student: Option<(&str, &str, &str)>) -> String {
    match student {
        Some((id, name, group)) => format!(
            "ws://{}/ws?userId={}&userName={}&groupCode={}",
            server,
            urlencoding::encode(id),
            urlencoding::encode(name),
            urlencoding::encode(group)
        ),
        None => format!("ws://{}/ws", server),
    }
}

async fn open(server: &str, student: Option<(&str, &str, &str)>) -> Option<(SocketWriter, SocketReader)> {
    match connect_async(socket_url(server, student)).await {
        Ok((ws_stream, _)) => Some(ws_stream.split()),
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            None
        }
    }
}

async fn emit(write: &mut SocketWriter, event: &str, data: Value) -> bool {
    let frame = json!({ "event": event, "data": data });
    write.send(Message::Text(frame.to_string())).await.is_ok()
}

/// Wait for the next frame carrying `event`, skipping everything else.
async fn expect_event(read: &mut SocketReader, event: &str, wait: Duration) -> Option<Value> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match timeout(remaining, read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                if let Ok(frame) = serde_json::from_str::<Value>(&text) {
                    if frame["event"] == event {
                        return Some(frame["data"].clone());
                    }
                }
            }
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(_))) | Ok(None) | Err(_) => return None,
        }
    }
}

/// Collect every frame that arrives within `wait`.
async fn drain(read: &mut SocketReader, wait: Duration) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(Some(Ok(message))) = timeout(wait, read.next()).await {
        if let Message::Text(text) = message {
            if let Ok(frame) = serde_json::from_str::<Value>(&text) {
                frames.push(frame);
            }
        }
    }
    frames
}

async fn check_health(server: &str) {
    println!("{}", "Checking server health...".cyan());

    let url = format!("http://{}/api/health", server);
    match reqwest::get(&url).await {
        Ok(resp) if resp.status().is_success() => {
            println!("{} Health check passed", "✓".green());
            if let Ok(body) = resp.json::<Value>().await {
                println!("  Service: {}", body["service"].as_str().unwrap_or("unknown"));
                println!("  Version: {}", body["version"].as_str().unwrap_or("unknown"));
                println!("  Connections: {}", body["connections"]);
                println!("  Participants: {}", body["participants"]);
            }
        }
        Ok(resp) => println!("{} Health check failed: {}", "✗".red(), resp.status()),
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            println!("  Make sure the server is running on {}", server);
        }
    }
}

async fn show_presence(server: &str) {
    let url = format!("http://{}/api/presence", server);
    match reqwest::get(&url).await {
        Ok(resp) => match resp.json::<Vec<Value>>().await {
            Ok(participants) if participants.is_empty() => println!("{}", "Nobody is online".yellow()),
            Ok(participants) => {
                println!("{} {} online", "●".green(), participants.len());
                for p in participants {
                    print_participant(&p);
                }
            }
            Err(e) => println!("{} Unexpected response: {}", "✗".red(), e),
        },
        Err(e) => println!("{} Cannot connect to server: {}", "✗".red(), e),
    }
}

fn print_participant(p: &Value) {
    let status = match p["status"].as_str() {
        Some("testing") => format!(
            "testing: {}",
            p["currentTestTitle"].as_str().unwrap_or("?")
        )
        .yellow(),
        Some(other) => other.green(),
        None => "unknown".red(),
    };
    println!(
        "  {:<16} {:<24} {:<8} {:<8} {}",
        p["id"].as_str().unwrap_or("?").bold(),
        p["displayName"].as_str().unwrap_or(""),
        p["role"].as_str().unwrap_or(""),
        p["groupCode"].as_str().unwrap_or("-"),
        status
    );
}

async fn watch(server: &str, no_frames: bool) {
    let Some((_write, mut read)) = open(server, None).await else {
        return;
    };
    println!("{} Watching {} (Ctrl+C to stop)", "✓".green(), socket_url(server, None));

    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                    println!("{} {}", "◀".yellow(), text);
                    continue;
                };
                match frame["event"].as_str().unwrap_or("") {
                    "online_students" => {
                        let list = frame["data"].as_array().cloned().unwrap_or_default();
                        println!("{} online_students ({})", "◀".green(), list.len());
                        for p in &list {
                            print_participant(p);
                        }
                    }
                    "screen_mirror_update" if no_frames => {}
                    "screen_mirror_update" => {
                        println!("{} screen frame from {}", "◀".blue(), frame["data"]["studentId"]);
                    }
                    event => println!("{} {} {}", "◀".green(), event.bold(), frame["data"]),
                }
            }
            Ok(Message::Close(_)) => {
                println!("{} Server closed the connection", "✗".yellow());
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                println!("{} Connection error: {}", "✗".red(), e);
                break;
            }
        }
    }
}

async fn simulate(
    server: &str,
    student_id: &str,
    name: Option<&str>,
    group: &str,
    test_title: &str,
    frames: u32,
    score: u32,
) {
    let name = name.unwrap_or(student_id);
    println!("{}", "Simulating student...".cyan());
    println!("  Student: {} ({})", student_id, name);
    println!("  Test: {}", test_title);

    let Some((mut write, mut read)) = open(server, Some((student_id, name, group))).await else {
        return;
    };

    if expect_event(&mut read, "online_students", Duration::from_secs(3)).await.is_some() {
        println!("{} Registered as online", "✓".green());
    } else {
        println!("{} No presence broadcast after connecting", "✗".red());
        return;
    }

    emit(&mut write, "test_started", json!({ "studentId": student_id, "testTitle": test_title })).await;
    println!("{} test_started sent", "✓".green());

    for seq in 0..frames {
        let sent = emit(
            &mut write,
            "screen_update",
            json!({ "studentId": student_id, "seq": seq, "image": "data:image/jpeg;base64,AAAA" }),
        )
        .await;
        if !sent {
            println!("{} Failed to send frame {}", "✗".red(), seq);
            return;
        }
        sleep(Duration::from_millis(500)).await;
    }
    println!("{} {} screen frames sent", "✓".green(), frames);

    emit(
        &mut write,
        "test_submitted",
        json!({ "studentId": student_id, "testTitle": test_title, "score": score }),
    )
    .await;
    match expect_event(&mut read, "test_submission", Duration::from_secs(3)).await {
        Some(_) => println!("{} Submission broadcast received", "✓".green()),
        None => println!("{} Submission broadcast not observed", "✗".red()),
    }

    let _ = write.close().await;
}

async fn post_activity(server: &str, activity: &str, user_name: Option<&str>, test_title: Option<&str>) {
    let url = format!("http://{}/api/activity", server);
    let body = json!({
        "activity": activity,
        "userName": user_name.unwrap_or("System"),
        "testTitle": test_title,
    });

    match reqwest::Client::new().post(&url).json(&body).send().await {
        Ok(resp) if resp.status().is_success() => println!("{} Activity relayed", "✓".green()),
        Ok(resp) => println!("{} Activity rejected: {}", "✗".red(), resp.status()),
        Err(e) => println!("{} Cannot connect to server: {}", "✗".red(), e),
    }
}

fn list_scenarios() {
    println!("\n{}", "Available Validation Scenarios:".bold());
    println!("  {} - Connecting student appears in online_students", "presence".cyan());
    println!("  {} - test_started / test_submitted broadcasts", "test-lifecycle".cyan());
    println!("  {} - Events for unknown students are ignored", "ghost-event".cyan());
    println!("  {} - Disconnect removes a testing student", "disconnect".cyan());
    println!("\nExample: presence-cli validate --scenario presence");
}

async fn run_scenario(server: &str, scenario: &str) {
    println!("\n{} {}", "Running scenario:".bold(), scenario.cyan());
    println!("{}", "─".repeat(60));

    let result = match scenario {
        "presence" => validate_presence(server).await,
        "test-lifecycle" => validate_test_lifecycle(server).await,
        "ghost-event" => validate_ghost_event(server).await,
        "disconnect" => validate_disconnect(server).await,
        _ => {
            println!("{} Unknown scenario: {}", "✗".red(), scenario);
            list_scenarios();
            return;
        }
    };

    println!("{}", "─".repeat(60));
    if result {
        println!("{} Scenario passed", "✓".green().bold());
    } else {
        println!("{} Scenario failed", "✗".red().bold());
    }
}

async fn run_all_validations(server: &str) {
    let scenarios = ["presence", "test-lifecycle", "ghost-event", "disconnect"];
    let mut passed = 0;

    for scenario in scenarios {
        let ok = match scenario {
            "presence" => validate_presence(server).await,
            "test-lifecycle" => validate_test_lifecycle(server).await,
            "ghost-event" => validate_ghost_event(server).await,
            _ => validate_disconnect(server).await,
        };
        let mark = if ok { "✓".green() } else { "✗".red() };
        println!("{} {}", mark, scenario);
        if ok {
            passed += 1;
        }
    }

    println!("\n{} {}/{} scenarios passed", "Summary:".bold(), passed, scenarios.len());
}

fn find<'a>(list: &'a Value, id: &str) -> Option<&'a Value> {
    list.as_array()?.iter().find(|p| p["id"] == id)
}

async fn validate_presence(server: &str) -> bool {
    let Some((mut write, mut read)) = open(server, Some(("cli_presence", "CLI Presence", "G1"))).await else {
        return false;
    };
    let list = expect_event(&mut read, "online_students", Duration::from_secs(3)).await;
    let _ = write.close().await;

    match list.as_ref().and_then(|l| find(l, "cli_presence")) {
        Some(p) if p["status"] == "online" => true,
        Some(p) => {
            println!("  Unexpected entry: {}", p);
            false
        }
        None => {
            println!("  Student missing from online_students");
            false
        }
    }
}

async fn validate_test_lifecycle(server: &str) -> bool {
    let Some((mut observer_write, mut observer)) = open(server, None).await else {
        return false;
    };
    let Some((mut write, mut read)) = open(server, Some(("cli_lifecycle", "CLI Lifecycle", "G1"))).await else {
        return false;
    };
    expect_event(&mut read, "online_students", Duration::from_secs(3)).await;

    emit(&mut write, "test_started", json!({ "studentId": "cli_lifecycle", "testTitle": "Quiz1" })).await;
    let started = expect_event(&mut observer, "student_status_update", Duration::from_secs(3)).await;
    let started_ok = started.as_ref().is_some_and(|u| u["status"] == "testing");
    let list = expect_event(&mut observer, "online_students", Duration::from_secs(3)).await;
    let listed_ok = list
        .as_ref()
        .and_then(|l| find(l, "cli_lifecycle"))
        .is_some_and(|p| p["currentTestTitle"] == "Quiz1");

    emit(&mut write, "test_submitted", json!({ "studentId": "cli_lifecycle", "score": 70 })).await;
    let finished = expect_event(&mut observer, "student_status_update", Duration::from_secs(3)).await;
    let finished_ok = finished.as_ref().is_some_and(|u| u["status"] == "finished");
    let submitted_ok = expect_event(&mut observer, "test_submission", Duration::from_secs(3))
        .await
        .is_some();

    let _ = write.close().await;
    let _ = observer_write.close().await;

    println!("  testing status: {}", started_ok);
    println!("  listed with title: {}", listed_ok);
    println!("  finished status: {}", finished_ok);
    println!("  submission relayed: {}", submitted_ok);
    started_ok && listed_ok && finished_ok && submitted_ok
}

async fn validate_ghost_event(server: &str) -> bool {
    let Some((mut write, mut read)) = open(server, None).await else {
        return false;
    };
    emit(&mut write, "test_started", json!({ "studentId": "cli_ghost", "testTitle": "Quiz1" })).await;

    let frames = drain(&mut read, Duration::from_secs(1)).await;
    let _ = write.close().await;

    let leaked = frames.iter().any(|f| f["data"]["studentId"] == "cli_ghost");
    if leaked {
        println!("  Ghost event produced a broadcast");
    }
    !leaked
}

async fn validate_disconnect(server: &str) -> bool {
    let Some((mut observer_write, mut observer)) = open(server, None).await else {
        return false;
    };
    let Some((mut write, mut read)) = open(server, Some(("cli_leaver", "CLI Leaver", "G1"))).await else {
        return false;
    };
    expect_event(&mut read, "online_students", Duration::from_secs(3)).await;
    emit(&mut write, "test_started", json!({ "studentId": "cli_leaver", "testTitle": "Quiz1" })).await;
    sleep(Duration::from_millis(200)).await;
    let _ = write.close().await;

    let mut gone = false;
    for frame in drain(&mut observer, Duration::from_secs(1)).await {
        if frame["event"] == "online_students" {
            gone = find(&frame["data"], "cli_leaver").is_none();
        }
    }
    let _ = observer_write.close().await;

    if !gone {
        println!("  Student still listed after disconnect");
    }
    gone
}
