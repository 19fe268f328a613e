/// Non-local transfer requests a statement handler hands back to the
/// controller instead of raising an error or falling through (§4.2, §9).
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMsg {
    SimpleJump { target: i64 },
    Gosub { target: i64 },
    LoopBegin { loop_var: String },
    LoopRepeat { loop_var: String },
    LoopSkip { loop_var: String },
    Return,
    Stop,
    /// Re-enter `parse` with the given tail of tokens, for the statement
    /// form of IF/THEN/ELSE (§4.2).
    Execute { tokens: Vec<crate::token::Token> },
}
