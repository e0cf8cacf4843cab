//! Binary trace decoder, the mirror of `writer.rs` (spec.md §4.3). Detects
//! the three documented failure modes: `CorruptTrace` (dictionary identifier
//! seen out of sequence, or structurally invalid payload), `TruncatedTrace`
//! (end of stream mid-record), `UnknownOp` (opcode byte the reader does not
//! recognize).

use crate::dict::{Dictionary, NONE};
use crate::operation::Operation;
use crate::opcode::Op;
use bytes::Bytes;
use replay_common::{Address, ReplayError, ReplayResult, Rules, H256, U256};

pub struct TraceReader<'a> {
    input: &'a [u8],
    pos: usize,
    pub first_block: u64,
    pub last_block: u64,
    addresses: Dictionary<Address>,
    hash_keys: Dictionary<H256>,
    hash_values: Dictionary<H256>,
}

impl<'a> TraceReader<'a> {
    pub fn new(input: &'a [u8]) -> ReplayResult<Self> {
        if input.len() < 16 {
            return Err(ReplayError::TruncatedTrace);
        }
        let first_block = u64::from_be_bytes(input[0..8].try_into().expect("checked length"));
        let last_block = u64::from_be_bytes(input[8..16].try_into().expect("checked length"));
        Ok(Self {
            input,
            pos: 16,
            first_block,
            last_block,
            addresses: Dictionary::new(),
            hash_keys: Dictionary::new(),
            hash_values: Dictionary::new(),
        })
    }

    fn remaining(&self) -> usize {
        self.input.len() - self.pos
    }

    fn take(&mut self, n: usize) -> ReplayResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(ReplayError::TruncatedTrace);
        }
        let slice = &self.input[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> ReplayResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> ReplayResult<u32> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().expect("length checked")))
    }

    fn read_u64(&mut self) -> ReplayResult<u64> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().expect("length checked")))
    }

    fn read_u256(&mut self) -> ReplayResult<U256> {
        Ok(U256::from_big_endian(self.take(32)?))
    }

    fn read_address(&mut self) -> ReplayResult<Address> {
        Ok(Address::from_slice(self.take(20)?))
    }

    fn read_hash(&mut self) -> ReplayResult<H256> {
        Ok(H256::from_slice(self.take(32)?))
    }

    fn read_bytes(&mut self) -> ReplayResult<Bytes> {
        let len = self.read_u32()? as usize;
        Ok(Bytes::copy_from_slice(self.take(len)?))
    }

    fn read_address_slot(&mut self) -> ReplayResult<Option<Address>> {
        let id = self.read_u32()?;
        if id == NONE {
            return Ok(None);
        }
        if id == self.addresses.len() {
            let value = self.read_address()?;
            self.addresses.learn(id, value)?;
            Ok(Some(value))
        } else {
            Ok(Some(self.addresses.get(id)?))
        }
    }

    fn read_hash_key_slot(&mut self) -> ReplayResult<Option<H256>> {
        let id = self.read_u32()?;
        if id == NONE {
            return Ok(None);
        }
        if id == self.hash_keys.len() {
            let value = self.read_hash()?;
            self.hash_keys.learn(id, value)?;
            Ok(Some(value))
        } else {
            Ok(Some(self.hash_keys.get(id)?))
        }
    }

    fn read_hash_value_slot(&mut self) -> ReplayResult<Option<H256>> {
        let id = self.read_u32()?;
        if id == NONE {
            return Ok(None);
        }
        if id == self.hash_values.len() {
            let value = self.read_hash()?;
            self.hash_values.learn(id, value)?;
            Ok(Some(value))
        } else {
            Ok(Some(self.hash_values.get(id)?))
        }
    }

    fn require_address(&mut self) -> ReplayResult<Address> {
        self.read_address_slot()?
            .ok_or_else(|| ReplayError::CorruptTrace("expected an address slot, found NONE".into()))
    }

    fn require_hash_key(&mut self) -> ReplayResult<H256> {
        self.read_hash_key_slot()?
            .ok_or_else(|| ReplayError::CorruptTrace("expected a hash-key slot, found NONE".into()))
    }

    fn require_hash_value(&mut self) -> ReplayResult<H256> {
        self.read_hash_value_slot()?
            .ok_or_else(|| ReplayError::CorruptTrace("expected a hash-value slot, found NONE".into()))
    }

    fn read_rules(&mut self) -> ReplayResult<Rules> {
        let flags = self.read_u8()?;
        Ok(Rules {
            warm_coinbase: flags & 0b001 != 0,
            eip6780_self_destruct: flags & 0b010 != 0,
            clear_empty_accounts: flags & 0b100 != 0,
        })
    }

    /// Returns `Ok(None)` at a clean end of stream (no partial record
    /// started), `Ok(Some(op))` for a fully decoded record.
    pub fn next_operation(&mut self) -> ReplayResult<Option<Operation>> {
        if self.remaining() == 0 {
            return Ok(None);
        }
        let op = Op::try_from(self.read_u8()?)?;
        Ok(Some(match op {
            Op::BeginSyncPeriod => Operation::BeginSyncPeriod { id: self.read_u64()? },
            Op::EndSyncPeriod => Operation::EndSyncPeriod,
            Op::BeginBlock => Operation::BeginBlock { number: self.read_u64()? },
            Op::EndBlock => Operation::EndBlock,
            Op::BeginTransaction => Operation::BeginTransaction { index: self.read_u64()? },
            Op::EndTransaction => Operation::EndTransaction,
            Op::SetTxContext => {
                let tx_hash = self.require_hash_value()?;
                Operation::SetTxContext { tx_hash, tx_index: self.read_u64()? }
            }
            Op::CreateAccount => Operation::CreateAccount { address: self.require_address()? },
            Op::CreateContract => Operation::CreateContract { address: self.require_address()? },
            Op::SelfDestruct => Operation::SelfDestruct { address: self.require_address()? },
            Op::SelfDestruct6780 => Operation::SelfDestruct6780 { address: self.require_address()? },
            Op::AddBalance => {
                let address = self.require_address()?;
                let amount = self.read_u256()?;
                let reason = self.read_u8()?;
                Operation::AddBalance { address, amount, reason }
            }
            Op::SubBalance => {
                let address = self.require_address()?;
                let amount = self.read_u256()?;
                let reason = self.read_u8()?;
                Operation::SubBalance { address, amount, reason }
            }
            Op::SetNonce => {
                let address = self.require_address()?;
                let nonce = self.read_u64()?;
                let reason = self.read_u8()?;
                Operation::SetNonce { address, nonce, reason }
            }
            Op::SetState => {
                let address = self.require_address()?;
                let key = self.require_hash_key()?;
                let value = self.require_hash_value()?;
                Operation::SetState { address, key, value }
            }
            Op::SetTransientState => {
                let address = self.require_address()?;
                let key = self.require_hash_key()?;
                let value = self.require_hash_value()?;
                Operation::SetTransientState { address, key, value }
            }
            Op::SetCode => {
                let address = self.require_address()?;
                let code = self.read_bytes()?;
                Operation::SetCode { address, code }
            }
            Op::AddRefund => Operation::AddRefund { amount: self.read_u64()? },
            Op::SubRefund => Operation::SubRefund { amount: self.read_u64()? },
            Op::Prepare => {
                let sender = self.require_address()?;
                let coinbase = self.require_address()?;
                let dest = self.read_address_slot()?;
                let rules = self.read_rules()?;
                let precompile_count = self.read_u32()? as usize;
                let mut precompiles = Vec::with_capacity(precompile_count);
                for _ in 0..precompile_count {
                    precompiles.push(self.read_address()?);
                }
                let access_list_count = self.read_u32()? as usize;
                let mut tx_access_list = Vec::with_capacity(access_list_count);
                for _ in 0..access_list_count {
                    let address = self.read_address()?;
                    let key_count = self.read_u32()? as usize;
                    let mut keys = Vec::with_capacity(key_count);
                    for _ in 0..key_count {
                        keys.push(self.read_hash()?);
                    }
                    tx_access_list.push((address, keys));
                }
                Operation::Prepare { rules, sender, coinbase, dest, precompiles, tx_access_list }
            }
            Op::AddAddressToAccessList => {
                Operation::AddAddressToAccessList { address: self.require_address()? }
            }
            Op::AddSlotToAccessList => {
                let address = self.require_address()?;
                let key = self.require_hash_key()?;
                Operation::AddSlotToAccessList { address, key }
            }
            Op::AddLog => {
                let address = self.require_address()?;
                let topic_count = self.read_u32()? as usize;
                let mut topics = Vec::with_capacity(topic_count);
                for _ in 0..topic_count {
                    topics.push(self.read_hash()?);
                }
                let data = self.read_bytes()?;
                Operation::AddLog { address, topics, data }
            }
            Op::GetLogs => {
                let tx_hash = self.require_hash_value()?;
                let block_hash = self.require_hash_value()?;
                let block_number = self.read_u64()?;
                let block_timestamp = self.read_u64()?;
                Operation::GetLogs { tx_hash, block_number, block_hash, block_timestamp }
            }
            Op::Snapshot => Operation::Snapshot,
            Op::RevertToSnapshot => Operation::RevertToSnapshot { id: self.read_u32()? },
            Op::AddPreimage => {
                let hash = self.require_hash_value()?;
                let preimage = self.read_bytes()?;
                Operation::AddPreimage { hash, preimage }
            }
            Op::Commit => Operation::Commit,
            Op::Finalise => Operation::Finalise { delete_empty_objects: self.read_u8()? != 0 },
            Op::IntermediateRoot => {
                Operation::IntermediateRoot { delete_empty_objects: self.read_u8()? != 0 }
            }
            Op::Close => Operation::Close,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::TraceWriter;

    #[test]
    fn header_round_trips() {
        let w = TraceWriter::new(10, 20);
        let bytes = w.into_bytes();
        let r = TraceReader::new(&bytes).unwrap();
        assert_eq!(r.first_block, 10);
        assert_eq!(r.last_block, 20);
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let mut bytes = TraceWriter::new(0, 0).into_bytes();
        bytes.push(255);
        let mut r = TraceReader::new(&bytes).unwrap();
        assert!(matches!(r.next_operation(), Err(ReplayError::UnknownOp(255))));
    }

    #[test]
    fn truncated_mid_operation_is_rejected() {
        let mut w = TraceWriter::new(0, 0);
        w.write(&Operation::CreateAccount { address: Address::repeat_byte(1) });
        let mut bytes = w.into_bytes();
        bytes.truncate(bytes.len() - 2);
        let mut r = TraceReader::new(&bytes).unwrap();
        assert!(matches!(r.next_operation(), Err(ReplayError::TruncatedTrace)));
    }
}
