//! The operation identifier byte that opens every trace record (spec.md
//! §4.3). Kept as a single exhaustive enum with a `TryFrom<u8>` so the
//! reader's dispatch is a compiler-checked match rather than an open-ended
//! byte comparison (Design Notes §9: "keep it as a single exhaustive match
//! on an opcode enum and let the compiler check coverage").

use replay_common::ReplayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    BeginSyncPeriod = 1,
    EndSyncPeriod = 2,
    BeginBlock = 3,
    EndBlock = 4,
    BeginTransaction = 5,
    EndTransaction = 6,
    SetTxContext = 7,

    CreateAccount = 8,
    CreateContract = 9,
    SelfDestruct = 10,
    SelfDestruct6780 = 11,
    AddBalance = 12,
    SubBalance = 13,
    SetNonce = 14,
    SetState = 15,
    SetTransientState = 16,
    SetCode = 17,
    AddRefund = 18,
    SubRefund = 19,
    Prepare = 20,
    AddAddressToAccessList = 21,
    AddSlotToAccessList = 22,
    AddLog = 23,
    GetLogs = 24,
    Snapshot = 25,
    RevertToSnapshot = 26,
    AddPreimage = 27,

    Commit = 28,
    Finalise = 29,
    IntermediateRoot = 30,
    Close = 31,
}

impl TryFrom<u8> for Op {
    type Error = ReplayError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        use Op::*;
        Ok(match byte {
            1 => BeginSyncPeriod,
            2 => EndSyncPeriod,
            3 => BeginBlock,
            4 => EndBlock,
            5 => BeginTransaction,
            6 => EndTransaction,
            7 => SetTxContext,
            8 => CreateAccount,
            9 => CreateContract,
            10 => SelfDestruct,
            11 => SelfDestruct6780,
            12 => AddBalance,
            13 => SubBalance,
            14 => SetNonce,
            15 => SetState,
            16 => SetTransientState,
            17 => SetCode,
            18 => AddRefund,
            19 => SubRefund,
            20 => Prepare,
            21 => AddAddressToAccessList,
            22 => AddSlotToAccessList,
            23 => AddLog,
            24 => GetLogs,
            25 => Snapshot,
            26 => RevertToSnapshot,
            27 => AddPreimage,
            28 => Commit,
            29 => Finalise,
            30 => IntermediateRoot,
            31 => Close,
            other => return Err(ReplayError::UnknownOp(other)),
        })
    }
}
