// Terminal output for sluice commands
// Everything goes to stderr except machine-readable results (report JSON, params)

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const BLUE: &str = "\x1b[34m";
const CYAN: &str = "\x1b[36m";

fn paint(style: &str, text: &str) -> String {
    format!("{}{}{}", style, text, RESET)
}

/// What happened to a work item, as shown in the progress stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemMark {
    Stale,
    Started,
    Done,
    Failed,
}

impl ItemMark {
    fn symbol(self) -> String {
        match self {
            ItemMark::Stale => paint(YELLOW, "?"),
            ItemMark::Started => paint(CYAN, ">"),
            ItemMark::Done => paint(GREEN, "\u{2713}"),
            ItemMark::Failed => paint(RED, "\u{2717}"),
        }
    }
}

/// `==> Running pipeline: ...`
pub fn header(message: &str) {
    eprintln!("{}", paint(BOLD, &format!("==> {}", message)));
}

/// `  Level 2 map, dedup`
pub fn level_header(level: usize, tasks: &[String]) {
    eprintln!("{} {}", paint(&format!("{}{}", BOLD, BLUE), &format!("  Level {}", level)), tasks.join(", "));
}

/// Task name right-aligned in a column, then a short status
pub fn task_status(task: &str, message: &str) {
    eprintln!("{} {}", paint(CYAN, &format!("{:>12}", task)), message);
}

/// One work item line under its task
pub fn item(mark: ItemMark, task: &str, detail: &str) {
    eprintln!("    {} {} {}", mark.symbol(), paint(BOLD, task), detail);
}

/// A stale item with the reason it has to be rebuilt
pub fn stale(task: &str, item_id: &str, reason: &str) {
    item(ItemMark::Stale, task, &format!("{} {}", item_id, paint(DIM, &format!("({})", reason))));
}

/// Failure diagnostic, indented under the failed item
pub fn diagnostic(text: &str) {
    for line in text.lines() {
        eprintln!("{}", paint(RED, &format!("        | {}", line)));
    }
}

/// Final line of a run
pub fn summary(success: bool, message: &str) {
    let mark = if success { ItemMark::Done } else { ItemMark::Failed };
    eprintln!("  {} {}", mark.symbol(), message);
}

/// A passed validation check
pub fn check(message: &str) {
    eprintln!("  {} {}", paint(GREEN, "\u{2713}"), message);
}

pub fn note(message: &str) {
    eprintln!("{}", paint(DIM, message));
}

pub fn info(message: &str) {
    eprintln!("  {} {}", paint(CYAN, "i"), message);
}

pub fn warning(message: &str) {
    eprintln!("  {} {}", paint(YELLOW, "!"), message);
}

pub fn error(message: &str) {
    eprintln!("{} {}", paint(&format!("{}{}", BOLD, RED), "error:"), message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paint_resets() {
        assert_eq!(paint(RED, "x"), "\x1b[31mx\x1b[0m");
    }

    #[test]
    fn test_item_marks_are_distinct() {
        let marks = [ItemMark::Stale, ItemMark::Started, ItemMark::Done, ItemMark::Failed];
        let symbols: Vec<String> = marks.iter().map(|m| m.symbol()).collect();
        assert!(symbols[0].contains('?'));
        assert!(symbols[2].contains('\u{2713}'));
        assert!(symbols[3].contains('\u{2717}'));
        for (i, a) in symbols.iter().enumerate() {
            for b in &symbols[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
