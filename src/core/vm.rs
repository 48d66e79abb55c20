use std::collections::BTreeMap;

use log::info;
use num_bigint::BigUint;
use num_traits::Zero;
use thiserror::Error;

/// Gas charged per executed instruction
const GAS_PER_INSTRUCTION: u64 = 1;

#[derive(Error, Debug, PartialEq)]
pub enum VmError {
    #[error("out of gas at instruction {0}")]
    OutOfGas(usize),

    #[error("stack underflow at instruction {0}")]
    StackUnderflow(usize),

    #[error("undefined opcode {0:?}")]
    UndefinedOpcode(String),

    #[error("operand is not a number: {0:?}")]
    NotANumber(String),

    #[error("jump target {0} is out of range")]
    BadJump(usize),

    #[error("opcode {0} is missing its operand")]
    MissingOperand(String),
}

/// Call context for one contract invocation
pub struct VmInput<'a> {
    /// Address of the transaction sender
    pub caller: &'a str,

    /// Wei transferred with the call
    pub value: &'a BigUint,

    /// Gas budget: the transaction's declared contract gas
    pub gas_limit: &'a BigUint,
}

#[derive(Debug, Clone, PartialEq)]
enum Op {
    Push(String),
    Pop,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Lt,
    Gt,
    JumpI(usize),
    SLoad(String),
    SStore(String),
    Caller,
    Value,
    Halt,
    /// Anything unrecognized; fails when executed, not when parsed
    Undefined(String),
}

fn parse(body: &str) -> Result<Vec<Op>, VmError> {
    let mut tokens = body.split_whitespace();
    let mut program = Vec::new();

    while let Some(token) = tokens.next() {
        let mut operand = |op: &str| {
            tokens
                .next()
                .map(str::to_string)
                .ok_or_else(|| VmError::MissingOperand(op.to_string()))
        };
        program.push(match token {
            "PUSH" => Op::Push(operand("PUSH")?),
            "POP" => Op::Pop,
            "ADD" => Op::Add,
            "SUB" => Op::Sub,
            "MUL" => Op::Mul,
            "DIV" => Op::Div,
            "MOD" => Op::Mod,
            "EQ" => Op::Eq,
            "LT" => Op::Lt,
            "GT" => Op::Gt,
            "JUMPI" => {
                let target = operand("JUMPI")?;
                let target: usize = target.parse().map_err(|_| VmError::NotANumber(target))?;
                Op::JumpI(target)
            }
            "SLOAD" => Op::SLoad(operand("SLOAD")?),
            "SSTORE" => Op::SStore(operand("SSTORE")?),
            "CALLER" => Op::Caller,
            "VALUE" => Op::Value,
            "HALT" => Op::Halt,
            other => Op::Undefined(other.to_string()),
        });
    }
    Ok(program)
}

/// Execute `body` against `storage`. Deterministic: all nodes compute the
/// same post-state for the same inputs. On error the caller must discard
/// `storage` — partial writes are not rolled back here.
pub fn execute(
    body: &str,
    storage: &mut BTreeMap<String, String>,
    input: &VmInput,
    log_events: bool,
) -> Result<(), VmError> {
    let program = parse(body)?;

    let mut stack: Vec<String> = Vec::new();
    let mut gas = gas_units(input.gas_limit);
    let mut pc = 0usize;

    while pc < program.len() {
        if gas == 0 {
            return Err(VmError::OutOfGas(pc));
        }
        gas -= GAS_PER_INSTRUCTION;

        match &program[pc] {
            Op::Push(literal) => stack.push(literal.clone()),
            Op::Pop => {
                pop(&mut stack, pc)?;
            }
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod => {
                let rhs = pop_number(&mut stack, pc)?;
                let lhs = pop_number(&mut stack, pc)?;
                let result = match &program[pc] {
                    Op::Add => lhs + rhs,
                    // saturating: balances and storage never go negative
                    Op::Sub => {
                        if lhs >= rhs {
                            lhs - rhs
                        } else {
                            BigUint::zero()
                        }
                    }
                    Op::Mul => lhs * rhs,
                    Op::Div => {
                        if rhs.is_zero() {
                            BigUint::zero()
                        } else {
                            lhs / rhs
                        }
                    }
                    Op::Mod => {
                        if rhs.is_zero() {
                            BigUint::zero()
                        } else {
                            lhs % rhs
                        }
                    }
                    _ => unreachable!(),
                };
                stack.push(result.to_str_radix(10));
            }
            Op::Eq | Op::Lt | Op::Gt => {
                let rhs = pop_number(&mut stack, pc)?;
                let lhs = pop_number(&mut stack, pc)?;
                let truth = match &program[pc] {
                    Op::Eq => lhs == rhs,
                    Op::Lt => lhs < rhs,
                    Op::Gt => lhs > rhs,
                    _ => unreachable!(),
                };
                stack.push(if truth { "1" } else { "0" }.to_string());
            }
            Op::JumpI(target) => {
                let condition = pop_number(&mut stack, pc)?;
                if !condition.is_zero() {
                    if *target >= program.len() {
                        return Err(VmError::BadJump(*target));
                    }
                    pc = *target;
                    continue;
                }
            }
            Op::SLoad(key) => {
                let value = storage.get(key).cloned().unwrap_or_else(|| "0".to_string());
                stack.push(value);
            }
            Op::SStore(key) => {
                let value = pop(&mut stack, pc)?;
                if log_events {
                    info!("[vm] SSTORE {key} = {value}");
                }
                storage.insert(key.clone(), value);
            }
            Op::Caller => stack.push(input.caller.to_string()),
            Op::Value => stack.push(input.value.to_str_radix(10)),
            Op::Halt => return Ok(()),
            Op::Undefined(token) => return Err(VmError::UndefinedOpcode(token.clone())),
        }
        pc += 1;
    }
    Ok(())
}

fn gas_units(limit: &BigUint) -> u64 {
    // a u64 of gas is far beyond any reachable program length
    u64::try_from(limit).unwrap_or(u64::MAX)
}

fn pop(stack: &mut Vec<String>, pc: usize) -> Result<String, VmError> {
    stack.pop().ok_or(VmError::StackUnderflow(pc))
}

fn pop_number(stack: &mut Vec<String>, pc: usize) -> Result<BigUint, VmError> {
    let raw = pop(stack, pc)?;
    raw.parse().map_err(|_| VmError::NotANumber(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(body: &str, gas: u64) -> Result<BTreeMap<String, String>, VmError> {
        let mut storage = BTreeMap::new();
        let caller = "c".repeat(64);
        let value = BigUint::from(5u8);
        execute(
            body,
            &mut storage,
            &VmInput {
                caller: &caller,
                value: &value,
                gas_limit: &BigUint::from(gas),
            },
            false,
        )?;
        Ok(storage)
    }

    #[test]
    fn add_and_store() {
        let storage = run("PUSH 1 PUSH 2 ADD SSTORE x HALT", 100).unwrap();
        assert_eq!(storage.get("x"), Some(&"3".to_string()));
    }

    #[test]
    fn sload_reads_back_stores() {
        let storage = run("PUSH 40 SSTORE a SLOAD a PUSH 2 ADD SSTORE b HALT", 100).unwrap();
        assert_eq!(storage.get("b"), Some(&"42".to_string()));
    }

    #[test]
    fn caller_and_value_push_call_context() {
        let storage = run("CALLER SSTORE who VALUE SSTORE paid HALT", 100).unwrap();
        assert_eq!(storage.get("who"), Some(&"c".repeat(64)));
        assert_eq!(storage.get("paid"), Some(&"5".to_string()));
    }

    #[test]
    fn comparisons_push_zero_or_one() {
        let storage = run("PUSH 1 PUSH 2 LT SSTORE lt PUSH 1 PUSH 2 GT SSTORE gt HALT", 100).unwrap();
        assert_eq!(storage.get("lt"), Some(&"1".to_string()));
        assert_eq!(storage.get("gt"), Some(&"0".to_string()));
    }

    #[test]
    fn jumpi_skips_when_condition_set() {
        // 0:PUSH 1  1:JUMPI 4  2:PUSH 9  3:SSTORE x  4:HALT
        let storage = run("PUSH 1 JUMPI 4 PUSH 9 SSTORE x HALT", 100).unwrap();
        assert!(storage.get("x").is_none());

        // condition zero falls through
        let storage = run("PUSH 0 JUMPI 4 PUSH 9 SSTORE x HALT", 100).unwrap();
        assert_eq!(storage.get("x"), Some(&"9".to_string()));

        // the condition is numeric: "00" is zero
        let storage = run("PUSH 00 JUMPI 4 PUSH 9 SSTORE x HALT", 100).unwrap();
        assert_eq!(storage.get("x"), Some(&"9".to_string()));
    }

    #[test]
    fn sub_saturates_and_div_by_zero_is_zero() {
        let storage = run("PUSH 2 PUSH 5 SUB SSTORE a PUSH 7 PUSH 0 DIV SSTORE b HALT", 100).unwrap();
        assert_eq!(storage.get("a"), Some(&"0".to_string()));
        assert_eq!(storage.get("b"), Some(&"0".to_string()));
    }

    #[test]
    fn gas_exhaustion_fails() {
        assert_eq!(
            run("PUSH 1 PUSH 2 ADD SSTORE x HALT", 2),
            Err(VmError::OutOfGas(2))
        );
    }

    #[test]
    fn stack_underflow_fails() {
        assert!(matches!(run("ADD HALT", 100), Err(VmError::StackUnderflow(0))));
    }

    #[test]
    fn undefined_opcode_fails_only_when_reached() {
        assert!(run("PUSH 1 JUMPI 3 SELFDESTRUCT HALT", 100).is_ok());
        assert_eq!(
            run("SELFDESTRUCT", 100),
            Err(VmError::UndefinedOpcode("SELFDESTRUCT".to_string()))
        );
    }

    #[test]
    fn loop_terminates_via_gas() {
        // 0:PUSH 1  1:JUMPI 0 — infinite loop, must die on gas
        assert!(matches!(run("PUSH 1 JUMPI 0", 50), Err(VmError::OutOfGas(_))));
    }
}
