//! Line-oriented driver for one learner at a terminal.

use std::io::{self, BufRead, Write};

use exam_core::model::ScoreReport;
use services::{ExamFlow, ExamView, FlowError, ImageState, RestartMode, SampleMode};
use services::sessions::{QuestionView, SessionProgress};

/// A parsed line of learner input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// 1-based choice numbers to select or toggle.
    Pick(Vec<usize>),
    Next,
    Back,
    Stop,
    Quit,
    Unknown(String),
}

impl Input {
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        match line {
            "n" | "next" | "" => return Input::Next,
            "b" | "back" => return Input::Back,
            "s" | "stop" => return Input::Stop,
            "q" | "quit" => return Input::Quit,
            _ => {}
        }
        let picks: Result<Vec<usize>, _> = line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|part| !part.is_empty())
            .map(str::parse::<usize>)
            .collect();
        match picks {
            Ok(picks) if !picks.is_empty() && picks.iter().all(|&n| n > 0) => Input::Pick(picks),
            _ => Input::Unknown(line.to_owned()),
        }
    }
}

/// Reads a sample mode answer: `c`apped or `a`ll.
#[must_use]
pub fn parse_sample_mode(line: &str) -> Option<SampleMode> {
    match line.trim() {
        "c" | "capped" => Some(SampleMode::Capped),
        "a" | "all" => Some(SampleMode::All),
        _ => None,
    }
}

/// Reads a restart answer. `None` means leave.
#[must_use]
pub fn parse_restart(line: &str) -> Option<RestartMode> {
    match line.trim() {
        "r" | "same" => Some(RestartMode::Same),
        "c" | "capped" => Some(RestartMode::Capped),
        "a" | "all" => Some(RestartMode::All),
        _ => None,
    }
}

fn prompt(lines: &mut impl Iterator<Item = io::Result<String>>, text: &str) -> io::Result<Option<String>> {
    print!("{text}");
    io::stdout().flush()?;
    lines.next().transpose()
}

/// Drive `flow` on stdin/stdout until the learner quits.
///
/// # Errors
///
/// Returns flow errors other than learner mistakes, and I/O errors.
pub async fn run(mut flow: ExamFlow, slug: &str) -> Result<(), Box<dyn std::error::Error>> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    flow.load_topic(slug).await?;

    loop {
        match flow.view() {
            ExamView::Idle => return Ok(()),
            ExamView::ChooseSample { topic, bank_size } => {
                println!("{topic}: {bank_size} questions.");
                let Some(line) = prompt(&mut lines, "Take [c]apped sample or [a]ll? ")? else {
                    return Ok(());
                };
                match parse_sample_mode(&line) {
                    Some(mode) => {
                        flow.start_session(mode).await?;
                    }
                    None => println!("Please answer c or a."),
                }
            }
            ExamView::Preloading { loaded, total } => {
                // Preloads settle inside the flow calls, so this is only seen mid-run.
                println!("Loading images {loaded}/{total}...");
                return Ok(());
            }
            ExamView::Empty { topic } => {
                println!("{topic}: there are no questions in this topic yet.");
                return Ok(());
            }
            ExamView::Question {
                topic,
                bank_size,
                question,
                progress,
            } => {
                render_question(&topic, bank_size, &question, progress);
                let Some(line) = prompt(&mut lines, "> ")? else {
                    return Ok(());
                };
                if !handle_input(&mut flow, &question, Input::parse(&line))? {
                    return Ok(());
                }
            }
            ExamView::Report { topic, report } => {
                render_report(&topic, &report);
                let Some(line) = prompt(&mut lines, "Again? [r]epeat, [c]apped, [a]ll, anything else quits: ")?
                else {
                    return Ok(());
                };
                match parse_restart(&line) {
                    Some(mode) => {
                        flow.restart(mode).await?;
                    }
                    None => return Ok(()),
                }
            }
        }
    }
}

/// Applies one input. Returns `false` when the learner wants to leave.
fn handle_input(flow: &mut ExamFlow, question: &QuestionView, input: Input) -> Result<bool, FlowError> {
    let result = match input {
        Input::Quit => return Ok(false),
        Input::Pick(numbers) => {
            let mut result = Ok(());
            for n in numbers {
                let Some(choice) = question.choices.get(n - 1) else {
                    println!("There is no choice {n}.");
                    break;
                };
                result = flow.select(choice.id);
                if result.is_err() {
                    break;
                }
            }
            result
        }
        Input::Next => flow.next().map(|_| ()),
        Input::Back => flow.back(),
        Input::Stop => flow.stop_and_grade().map(|_| ()),
        Input::Unknown(raw) => {
            println!("Unrecognized input: {raw}");
            Ok(())
        }
    };

    match result {
        Ok(()) => Ok(true),
        Err(FlowError::Session(err)) => {
            println!("{err}");
            Ok(true)
        }
        Err(err) => Err(err),
    }
}

fn render_question(topic: &str, bank_size: usize, question: &QuestionView, progress: SessionProgress) {
    println!();
    println!(
        "{topic} | questions in topic: {bank_size} | answered: {}/{}",
        progress.answered, progress.total
    );
    println!(
        "Question {} / {} ({}%)",
        progress.index + 1,
        progress.total,
        progress.percent
    );
    println!("{}", question.text);
    if let Some(image) = &question.image {
        let label = image.alt.as_deref().unwrap_or(image.url.as_str());
        match image.state {
            ImageState::Ready => println!("[image: {label}]"),
            ImageState::Broken | ImageState::Missing => println!("[image unavailable: {label}]"),
        }
    }
    for (i, choice) in question.choices.iter().enumerate() {
        let mark = if choice.selected { "x" } else { " " };
        println!("  [{mark}] {}. {}", i + 1, choice.text);
    }
    let hint = if question.multiple {
        "select one or more (numbers toggle)"
    } else {
        "select one"
    };
    let next = if progress.is_last { "finish" } else { "next" };
    println!("({hint}; n = {next}, b = back, s = stop and grade, q = quit)");
}

fn render_report(topic: &str, report: &ScoreReport) {
    println!();
    println!(
        "{topic}: {} of {} correct ({}%)",
        report.correct(),
        report.total(),
        report.percent()
    );
    for (i, detail) in report.details().iter().enumerate() {
        let verdict = if detail.is_correct { "correct" } else { "wrong" };
        println!("{}. {} [{verdict}]", i + 1, detail.text);
        for choice in &detail.choices {
            let picked = if detail.selected.contains(&choice.id) { ">" } else { " " };
            let right = if detail.correct.contains(&choice.id) { "*" } else { " " };
            println!("   {picked}{right} {}", choice.text);
        }
        if let Some(explanation) = &detail.explanation {
            println!("   {explanation}");
        }
    }
}
