//! Binary trace encoder (spec.md §4.3). Big-endian throughout; no
//! compression at this layer (an orthogonal stream wrapper is the spec's
//! prescribed place for that, out of scope here).

use crate::dict::{Dictionary, NONE};
use crate::operation::Operation;
use crate::opcode::Op;
use replay_common::{Address, Rules, H256, U256};

pub struct TraceWriter {
    out: Vec<u8>,
    addresses: Dictionary<Address>,
    hash_keys: Dictionary<H256>,
    hash_values: Dictionary<H256>,
}

impl TraceWriter {
    pub fn new(first_block: u64, last_block: u64) -> Self {
        let mut out = Vec::new();
        out.extend_from_slice(&first_block.to_be_bytes());
        out.extend_from_slice(&last_block.to_be_bytes());
        Self {
            out,
            addresses: Dictionary::new(),
            hash_keys: Dictionary::new(),
            hash_values: Dictionary::new(),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.out
    }

    fn write_u8(&mut self, v: u8) {
        self.out.push(v);
    }

    fn write_u32(&mut self, v: u32) {
        self.out.extend_from_slice(&v.to_be_bytes());
    }

    fn write_u64(&mut self, v: u64) {
        self.out.extend_from_slice(&v.to_be_bytes());
    }

    fn write_u256(&mut self, v: U256) {
        self.out.extend_from_slice(&v.to_big_endian());
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_u32(bytes.len() as u32);
        self.out.extend_from_slice(bytes);
    }

    fn write_address_slot(&mut self, address: Option<Address>) {
        match address {
            None => self.write_u32(NONE),
            Some(a) => {
                let (id, is_new) = self.addresses.intern(a);
                self.write_u32(id);
                if is_new {
                    self.out.extend_from_slice(a.as_bytes());
                }
            }
        }
    }

    fn write_hash_key_slot(&mut self, key: Option<H256>) {
        match key {
            None => self.write_u32(NONE),
            Some(k) => {
                let (id, is_new) = self.hash_keys.intern(k);
                self.write_u32(id);
                if is_new {
                    self.out.extend_from_slice(k.as_bytes());
                }
            }
        }
    }

    fn write_hash_value_slot(&mut self, value: Option<H256>) {
        match value {
            None => self.write_u32(NONE),
            Some(v) => {
                let (id, is_new) = self.hash_values.intern(v);
                self.write_u32(id);
                if is_new {
                    self.out.extend_from_slice(v.as_bytes());
                }
            }
        }
    }

    fn write_rules(&mut self, rules: Rules) {
        let mut flags = 0u8;
        if rules.warm_coinbase {
            flags |= 0b001;
        }
        if rules.eip6780_self_destruct {
            flags |= 0b010;
        }
        if rules.clear_empty_accounts {
            flags |= 0b100;
        }
        self.write_u8(flags);
    }

    pub fn write(&mut self, op: &Operation) {
        match op {
            Operation::BeginSyncPeriod { id } => {
                self.write_u8(Op::BeginSyncPeriod as u8);
                self.write_u64(*id);
            }
            Operation::EndSyncPeriod => self.write_u8(Op::EndSyncPeriod as u8),
            Operation::BeginBlock { number } => {
                self.write_u8(Op::BeginBlock as u8);
                self.write_u64(*number);
            }
            Operation::EndBlock => self.write_u8(Op::EndBlock as u8),
            Operation::BeginTransaction { index } => {
                self.write_u8(Op::BeginTransaction as u8);
                self.write_u64(*index);
            }
            Operation::EndTransaction => self.write_u8(Op::EndTransaction as u8),
            Operation::SetTxContext { tx_hash, tx_index } => {
                self.write_u8(Op::SetTxContext as u8);
                self.write_hash_value_slot(Some(*tx_hash));
                self.write_u64(*tx_index);
            }
            Operation::CreateAccount { address } => {
                self.write_u8(Op::CreateAccount as u8);
                self.write_address_slot(Some(*address));
            }
            Operation::CreateContract { address } => {
                self.write_u8(Op::CreateContract as u8);
                self.write_address_slot(Some(*address));
            }
            Operation::SelfDestruct { address } => {
                self.write_u8(Op::SelfDestruct as u8);
                self.write_address_slot(Some(*address));
            }
            Operation::SelfDestruct6780 { address } => {
                self.write_u8(Op::SelfDestruct6780 as u8);
                self.write_address_slot(Some(*address));
            }
            Operation::AddBalance { address, amount, reason } => {
                self.write_u8(Op::AddBalance as u8);
                self.write_address_slot(Some(*address));
                self.write_u256(*amount);
                self.write_u8(*reason);
            }
            Operation::SubBalance { address, amount, reason } => {
                self.write_u8(Op::SubBalance as u8);
                self.write_address_slot(Some(*address));
                self.write_u256(*amount);
                self.write_u8(*reason);
            }
            Operation::SetNonce { address, nonce, reason } => {
                self.write_u8(Op::SetNonce as u8);
                self.write_address_slot(Some(*address));
                self.write_u64(*nonce);
                self.write_u8(*reason);
            }
            Operation::SetState { address, key, value } => {
                self.write_u8(Op::SetState as u8);
                self.write_address_slot(Some(*address));
                self.write_hash_key_slot(Some(*key));
                self.write_hash_value_slot(Some(*value));
            }
            Operation::SetTransientState { address, key, value } => {
                self.write_u8(Op::SetTransientState as u8);
                self.write_address_slot(Some(*address));
                self.write_hash_key_slot(Some(*key));
                self.write_hash_value_slot(Some(*value));
            }
            Operation::SetCode { address, code } => {
                self.write_u8(Op::SetCode as u8);
                self.write_address_slot(Some(*address));
                self.write_bytes(code);
            }
            Operation::AddRefund { amount } => {
                self.write_u8(Op::AddRefund as u8);
                self.write_u64(*amount);
            }
            Operation::SubRefund { amount } => {
                self.write_u8(Op::SubRefund as u8);
                self.write_u64(*amount);
            }
            Operation::Prepare {
                rules,
                sender,
                coinbase,
                dest,
                precompiles,
                tx_access_list,
            } => {
                self.write_u8(Op::Prepare as u8);
                self.write_address_slot(Some(*sender));
                self.write_address_slot(Some(*coinbase));
                self.write_address_slot(*dest);
                self.write_rules(*rules);
                self.write_u32(precompiles.len() as u32);
                for p in precompiles {
                    self.out.extend_from_slice(p.as_bytes());
                }
                self.write_u32(tx_access_list.len() as u32);
                for (address, keys) in tx_access_list {
                    self.out.extend_from_slice(address.as_bytes());
                    self.write_u32(keys.len() as u32);
                    for key in keys {
                        self.out.extend_from_slice(key.as_bytes());
                    }
                }
            }
            Operation::AddAddressToAccessList { address } => {
                self.write_u8(Op::AddAddressToAccessList as u8);
                self.write_address_slot(Some(*address));
            }
            Operation::AddSlotToAccessList { address, key } => {
                self.write_u8(Op::AddSlotToAccessList as u8);
                self.write_address_slot(Some(*address));
                self.write_hash_key_slot(Some(*key));
            }
            Operation::AddLog { address, topics, data } => {
                self.write_u8(Op::AddLog as u8);
                self.write_address_slot(Some(*address));
                self.write_u32(topics.len() as u32);
                for topic in topics {
                    self.out.extend_from_slice(topic.as_bytes());
                }
                self.write_bytes(data);
            }
            Operation::GetLogs { tx_hash, block_number, block_hash, block_timestamp } => {
                self.write_u8(Op::GetLogs as u8);
                self.write_hash_value_slot(Some(*tx_hash));
                self.write_hash_value_slot(Some(*block_hash));
                self.write_u64(*block_number);
                self.write_u64(*block_timestamp);
            }
            Operation::Snapshot => self.write_u8(Op::Snapshot as u8),
            Operation::RevertToSnapshot { id } => {
                self.write_u8(Op::RevertToSnapshot as u8);
                self.write_u32(*id);
            }
            Operation::AddPreimage { hash, preimage } => {
                self.write_u8(Op::AddPreimage as u8);
                self.write_hash_value_slot(Some(*hash));
                self.write_bytes(preimage);
            }
            Operation::Commit => self.write_u8(Op::Commit as u8),
            Operation::Finalise { delete_empty_objects } => {
                self.write_u8(Op::Finalise as u8);
                self.write_u8(u8::from(*delete_empty_objects));
            }
            Operation::IntermediateRoot { delete_empty_objects } => {
                self.write_u8(Op::IntermediateRoot as u8);
                self.write_u8(u8::from(*delete_empty_objects));
            }
            Operation::Close => self.write_u8(Op::Close as u8),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_address_is_only_inlined_once() {
        let mut w = TraceWriter::new(0, 0);
        let a = Address::repeat_byte(1);
        w.write(&Operation::CreateAccount { address: a });
        let len_after_first = w.out.len();
        w.write(&Operation::CreateAccount { address: a });
        let len_after_second = w.out.len();
        // op byte (1) + slot id (4), no inline 20 bytes the second time.
        assert_eq!(len_after_second - len_after_first, 5);
    }
}
