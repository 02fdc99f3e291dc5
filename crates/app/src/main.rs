use std::fmt;
use std::str::FromStr;

use progress_core::model::{CourseId, LessonId, LessonPercent, UserId};
use rand::Rng;
use serde::Serialize;
use services::{AppServices, Clock, ProgressConfig};
use storage::sqlite::SqliteRepository;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_DB_URL: &str = "sqlite://progress.sqlite3";
const DEFAULT_LOG_LEVEL: &str = "warn";

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingFlag { flag: &'static str },
    UnknownArg(String),
    InvalidValue { flag: &'static str, raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingFlag { flag } => write!(f, "{flag} is required for this command"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidValue { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn parse_value<T: FromStr>(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<T, ArgsError> {
    let raw = require_value(args, flag)?;
    raw.trim()
        .parse()
        .map_err(|_| ArgsError::InvalidValue { flag, raw })
}

fn required<T>(value: Option<T>, flag: &'static str) -> Result<T, ArgsError> {
    value.ok_or(ArgsError::MissingFlag { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  progress progress --user <id> --course <id>");
    eprintln!("  progress track    --user <id> --course <id> --lesson <id> --percent <0-100>");
    eprintln!("  progress complete --user <id> --course <id> --lesson <id>");
    eprintln!("  progress time     --user <id> --course <id> --lesson <id> --secs <n>");
    eprintln!("  progress notes    --user <id> --course <id> --lesson <id> [--text <notes>]");
    eprintln!("  progress next     --user <id> --course <id>");
    eprintln!("  progress user     --user <id>");
    eprintln!("  progress stats    --course <id>");
    eprintln!("  progress seed     --course <id> [--lessons <n>] [--students <n>]");
    eprintln!();
    eprintln!("Common flags:");
    eprintln!("  --db <sqlite_url>      default {DEFAULT_DB_URL}");
    eprintln!("  --log-level <filter>   overrides RUST_LOG");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  PROGRESS_DB_URL, RUST_LOG, PROGRESS_MAX_ATTEMPTS,");
    eprintln!("  PROGRESS_RETRY_BACKOFF_MS, PROGRESS_STATS_BATCH_SIZE");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Progress,
    Track,
    Complete,
    Time,
    Notes,
    Next,
    User,
    Stats,
    Seed,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "progress" => Some(Self::Progress),
            "track" => Some(Self::Track),
            "complete" => Some(Self::Complete),
            "time" => Some(Self::Time),
            "notes" => Some(Self::Notes),
            "next" => Some(Self::Next),
            "user" => Some(Self::User),
            "stats" => Some(Self::Stats),
            "seed" => Some(Self::Seed),
            _ => None,
        }
    }
}

struct Args {
    db_url: String,
    log_level: Option<String>,
    user: Option<UserId>,
    course: Option<CourseId>,
    lesson: Option<LessonId>,
    percent: Option<LessonPercent>,
    secs: Option<u64>,
    text: Option<String>,
    lessons: u64,
    students: u64,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut parsed = Self {
            db_url: std::env::var("PROGRESS_DB_URL")
                .ok()
                .map_or_else(|| DEFAULT_DB_URL.into(), normalize_sqlite_url),
            log_level: None,
            user: None,
            course: None,
            lesson: None,
            percent: None,
            secs: None,
            text: None,
            lessons: 8,
            students: 25,
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    parsed.db_url = normalize_sqlite_url(value);
                }
                "--log-level" => parsed.log_level = Some(require_value(args, "--log-level")?),
                "--user" => parsed.user = Some(parse_value(args, "--user")?),
                "--course" => parsed.course = Some(parse_value(args, "--course")?),
                "--lesson" => parsed.lesson = Some(parse_value(args, "--lesson")?),
                "--percent" => parsed.percent = Some(parse_value(args, "--percent")?),
                "--secs" => parsed.secs = Some(parse_value(args, "--secs")?),
                "--text" => parsed.text = Some(require_value(args, "--text")?),
                "--lessons" => parsed.lessons = parse_value(args, "--lessons")?,
                "--students" => parsed.students = parse_value(args, "--students")?,
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(parsed)
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim();
    let path_str = trimmed.strip_prefix("sqlite:").unwrap_or(trimmed);
    let path = std::path::Path::new(path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn emit(value: &impl Serialize) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Seeded lesson ids are `course * SEED_LESSON_STRIDE + position`.
const SEED_LESSON_STRIDE: u64 = 1_000;

fn seed_lesson_ids(course: CourseId, lessons: u64) -> Result<Vec<LessonId>, ArgsError> {
    if lessons >= SEED_LESSON_STRIDE {
        return Err(ArgsError::InvalidValue {
            flag: "--lessons",
            raw: lessons.to_string(),
        });
    }
    let base = course
        .value()
        .checked_mul(SEED_LESSON_STRIDE)
        .ok_or_else(|| ArgsError::InvalidValue {
            flag: "--course",
            raw: course.to_string(),
        })?;
    (1..=lessons)
        .map(|position| {
            base.checked_add(position)
                .map(LessonId::new)
                .ok_or_else(|| ArgsError::InvalidValue {
                    flag: "--course",
                    raw: course.to_string(),
                })
        })
        .collect()
}

/// One synthetic learner: how many lessons they finished and where they paused.
struct SeedStudent {
    user: UserId,
    completed: usize,
    paused_at: Option<f64>,
    secs_per_lesson: u64,
}

fn plan_students(students: u64, lessons: usize) -> Vec<SeedStudent> {
    let mut rng = rand::rng();
    (1..=students)
        .map(|user| {
            let completed = rng.random_range(0..=lessons);
            let paused_at = (completed < lessons && rng.random_bool(0.6))
                .then(|| f64::from(rng.random_range(5_u8..90)));
            SeedStudent {
                user: UserId::new(user),
                completed,
                paused_at,
                secs_per_lesson: rng.random_range(120..=900),
            }
        })
        .collect()
}

async fn seed(
    args: &Args,
    course: CourseId,
    repo: &SqliteRepository,
    services: &AppServices,
) -> Result<(), Box<dyn std::error::Error>> {
    let lesson_ids = seed_lesson_ids(course, args.lessons)?;
    for (position, lesson) in (1_u32..).zip(&lesson_ids) {
        repo.add_lesson(course, *lesson, position).await?;
    }

    let progress = services.progress();
    for student in plan_students(args.students, lesson_ids.len()) {
        for lesson in &lesson_ids[..student.completed] {
            progress
                .record_time_spent(student.user, course, *lesson, student.secs_per_lesson)
                .await?;
            progress.complete_lesson(student.user, course, *lesson).await?;
        }
        let paused = student.paused_at.zip(lesson_ids.get(student.completed));
        if let Some((percent, lesson)) = paused {
            progress
                .track_lesson_progress(student.user, course, *lesson, percent)
                .await?;
        }
    }

    info!(course = %course, lessons = args.lessons, students = args.students, "seeded course");
    emit(&services.stats().get_course_stats(course).await?)
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);

    let cmd = match argv.next() {
        None => {
            print_usage();
            return Ok(());
        }
        Some(first) if first == "--help" || first == "-h" => {
            print_usage();
            return Ok(());
        }
        Some(first) => Command::from_arg(&first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    let args = Args::parse(&mut argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    init_logging(args.log_level.as_deref());
    prepare_sqlite_file(&args.db_url)?;

    let repo = SqliteRepository::connect(&args.db_url).await?;
    let services =
        AppServices::new_sqlite(&repo, Clock::system(), ProgressConfig::from_env()).await?;
    let progress = services.progress();

    match cmd {
        Command::Progress => {
            let user = required(args.user, "--user")?;
            let course = required(args.course, "--course")?;
            emit(&progress.get_course_progress(user, course).await?)
        }
        Command::Track => {
            let user = required(args.user, "--user")?;
            let course = required(args.course, "--course")?;
            let lesson = required(args.lesson, "--lesson")?;
            let percent = required(args.percent, "--percent")?;
            let summary = progress
                .track_lesson_progress(user, course, lesson, f64::from(percent.value()))
                .await?;
            emit(&summary)
        }
        Command::Complete => {
            let user = required(args.user, "--user")?;
            let course = required(args.course, "--course")?;
            let lesson = required(args.lesson, "--lesson")?;
            emit(&progress.complete_lesson(user, course, lesson).await?)
        }
        Command::Time => {
            let user = required(args.user, "--user")?;
            let course = required(args.course, "--course")?;
            let lesson = required(args.lesson, "--lesson")?;
            let secs = required(args.secs, "--secs")?;
            emit(&progress.record_time_spent(user, course, lesson, secs).await?)
        }
        Command::Notes => {
            let user = required(args.user, "--user")?;
            let course = required(args.course, "--course")?;
            let lesson = required(args.lesson, "--lesson")?;
            let summary = progress
                .update_lesson_notes(user, course, lesson, args.text)
                .await?;
            emit(&summary)
        }
        Command::Next => {
            let user = required(args.user, "--user")?;
            let course = required(args.course, "--course")?;
            emit(&progress.next_lesson(user, course).await?)
        }
        Command::User => {
            let user = required(args.user, "--user")?;
            emit(&progress.list_user_progress(user).await?)
        }
        Command::Stats => {
            let course = required(args.course, "--course")?;
            emit(&services.stats().get_course_stats(course).await?)
        }
        Command::Seed => {
            let course = required(args.course, "--course")?;
            seed(&args, course, &repo, &services).await
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_lesson_ids_follow_course_stride() {
        let ids = seed_lesson_ids(CourseId::new(7), 3).unwrap();
        assert_eq!(ids, vec![LessonId::new(7001), LessonId::new(7002), LessonId::new(7003)]);
    }

    #[test]
    fn seed_lesson_ids_reject_overflowing_course() {
        let err = seed_lesson_ids(CourseId::new(u64::MAX / 1_000 + 1), 1).unwrap_err();
        assert!(matches!(err, ArgsError::InvalidValue { flag: "--course", .. }));

        let err = seed_lesson_ids(CourseId::new(u64::MAX / 1_000), 1_000).unwrap_err();
        assert!(matches!(err, ArgsError::InvalidValue { flag: "--lessons", .. }));
    }

    #[test]
    fn seed_lesson_ids_reject_last_position_overflow() {
        let course = CourseId::new(u64::MAX / 1_000);
        let base = course.value() * 1_000;
        let room = u64::MAX - base;
        let err = seed_lesson_ids(course, room + 1).unwrap_err();
        assert!(matches!(err, ArgsError::InvalidValue { .. }));
    }

    #[test]
    fn planned_students_stay_within_the_syllabus() {
        for student in plan_students(50, 4) {
            assert!(student.completed <= 4);
            if student.completed == 4 {
                assert!(student.paused_at.is_none());
            }
        }
    }
}
