mod assembler;
mod body;
mod disassembler;
mod flow;
mod instruction;

pub use assembler::{AssembleOptions, CodeOutput, ExceptionRow, LocalVarRow};
pub use body::*;
pub use disassembler::listing;
pub use flow::AssignmentCheck;
pub use instruction::*;

pub(crate) use flow::{check_assignment, FlowInfo};
