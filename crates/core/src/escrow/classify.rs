//! Instruction classification from program logs.

use crate::models::InstructionKind;

/// Map a transaction's log lines to the escrow instruction it executed.
///
/// Lines are scanned in order and the first line carrying a known
/// instruction marker decides. Unrelated or empty logs yield `None`.
pub fn classify<S: AsRef<str>>(log_lines: &[S]) -> Option<InstructionKind> {
    log_lines.iter().find_map(|line| {
        let line = line.as_ref();
        InstructionKind::ALL
            .into_iter()
            .find(|kind| line.contains(kind.log_marker()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROGRAM: &str = "HZ9ZSXtebTKYGRR7ZNsetroAT7Kh8ymKExcf5FF9dLNq";

    fn logs(instruction: &str) -> Vec<String> {
        vec![
            format!("Program {PROGRAM} invoke [1]"),
            format!("Program log: Instruction: {instruction}"),
            "Program 11111111111111111111111111111111 invoke [2]".to_string(),
            format!("Program {PROGRAM} success"),
        ]
    }

    #[test]
    fn classifies_each_instruction() {
        assert_eq!(classify(&logs("CreateEscrow")), Some(InstructionKind::CreateEscrow));
        assert_eq!(classify(&logs("LockForTaker")), Some(InstructionKind::LockForTaker));
        assert_eq!(classify(&logs("ReleaseToTaker")), Some(InstructionKind::ReleaseToTaker));
        assert_eq!(classify(&logs("RefundToMaker")), Some(InstructionKind::RefundToMaker));
    }

    #[test]
    fn unrelated_or_empty_logs_are_none() {
        assert_eq!(classify(&logs("Transfer")), None);
        assert_eq!(classify::<String>(&[]), None);
        // bare name without the marker prefix is not enough
        assert_eq!(classify(&["CreateEscrow"]), None);
    }

    #[test]
    fn first_marked_line_wins() {
        let lines = [
            "Program log: Instruction: LockForTaker",
            "Program log: Instruction: ReleaseToTaker",
        ];
        assert_eq!(classify(&lines), Some(InstructionKind::LockForTaker));
    }
}
