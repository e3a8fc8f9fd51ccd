//! Line-based terminal prompts.

use std::io::{self, BufRead, Write};

use goexport_common::params::parse_bool;

/// Asks questions on stdin unless prompts are disabled.
pub struct Prompter {
    interactive: bool,
}

impl Prompter {
    pub fn new(no_input: bool) -> Self {
        Self {
            interactive: !no_input,
        }
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    /// Free-form answer; blank input returns `default`.
    pub fn ask(&self, question: &str, default: Option<&str>) -> Option<String> {
        if !self.interactive {
            return default.map(str::to_string);
        }
        match default {
            Some(d) => print!("{question} [{d}]: "),
            None => print!("{question}: "),
        }
        let answer = read_line()?;
        if answer.is_empty() {
            default.map(str::to_string)
        } else {
            Some(answer)
        }
    }

    /// Yes/no question. Without prompts the answer is `unattended`.
    pub fn confirm(&self, question: &str, unattended: bool) -> bool {
        if !self.interactive {
            return unattended;
        }
        loop {
            print!("{question} [y/n]: ");
            let Some(answer) = read_line() else {
                return unattended;
            };
            if let Some(value) = parse_bool(&answer) {
                return value;
            }
            println!("Please answer yes or no.");
        }
    }

    /// Pick one of `options` by number; blank input picks `default`.
    pub fn choose(&self, question: &str, options: &[String], default: usize) -> Option<usize> {
        if !self.interactive {
            return (default < options.len()).then_some(default);
        }
        println!("{question}");
        for (i, option) in options.iter().enumerate() {
            println!("  {}. {option}", i + 1);
        }
        loop {
            let answer = self.ask("Choice", Some(&(default + 1).to_string()))?;
            match answer.parse::<usize>() {
                Ok(n) if (1..=options.len()).contains(&n) => return Some(n - 1),
                _ => println!("Enter a number between 1 and {}.", options.len()),
            }
        }
    }
}

fn read_line() -> Option<String> {
    let _ = io::stdout().flush();
    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim().to_string()),
    }
}
