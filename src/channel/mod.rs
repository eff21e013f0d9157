//! # Channel demultiplexer
//!
//! The channel module isolates one service out of a multi-program transport
//! stream (MPTS→SPTS). Attached under a packet source, it tracks the
//! stream's PSI tables (PAT/CAT/PMT/SDT/EIT), requests exactly the PIDs its
//! program needs, and emits a rewritten single-program stream to its
//! children:
//!
//! - a single-entry PAT carrying only the selected program;
//! - a PMT with filtered elementary streams and back-patched lengths;
//! - an SDT reduced to the selected service;
//! - EIT sections renumbered onto the channel's own continuity counter;
//! - elementary-stream packets forwarded as-is or PID-remapped.
//!
//! Change detection is checksum-driven: each table's CRC32 is latched on
//! first arrival, and a later section with a different checksum triggers a
//! full stream reload (subscriptions dropped and re-acquired, tables
//! re-learned). With `no_reload` set, tables are captured once and the
//! cached rewrites are re-emitted by a 500 ms SI timer instead.
//!
//! Without a program number the channel degrades to a plain PID pass
//! filter over its `pids` list.
//!
//! ## Example
//!
//! ```rust
//! use tspipe::channel::{Channel, ChannelConfig};
//! use tspipe::stream::StreamGraph;
//!
//! # fn main() -> tspipe::Result<()> {
//! let mut graph = StreamGraph::new();
//! let source = graph.add_node(None);
//!
//! let mut config = ChannelConfig::new("news");
//! config.pnr = Some(1);
//! config.map = vec![("video".into(), 0x200), ("audio".into(), 0x201)];
//!
//! let channel = Channel::new(&mut graph, Some(source), config)?;
//! // feed packets into `source`; the channel's children receive the
//! // rewritten single-program stream
//! # let _ = channel;
//! # Ok(())
//! # }
//! ```


use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use log::{error, warn};

use crate::error::{Result, TsPipeError};
use crate::runtime::Interval;
use crate::stream::{NodeId, StreamGraph, TsSink};
use crate::ts::packet;
use crate::ts::psi::{self, PsiPacket};
use crate::ts::tables;
use crate::ts::types::{
    private_es_type, stream_es_type, TsType, CRC32_SIZE, DESC_TAG_CA, DESC_TAG_LANGUAGE,
    NULL_PID, PID_CAT, PID_EIT, PID_PAT, PID_SDT, PID_TDT, TABLE_ID_CAT,
    TABLE_ID_EIT_PF_ACTUAL, TABLE_ID_EIT_SCHED_FIRST, TABLE_ID_EIT_SCHED_LAST, TABLE_ID_PAT,
    TABLE_ID_PMT, TABLE_ID_SDT_ACTUAL, TS_MAX_PIDS, TS_PACKET_SIZE,
};
use crate::utils::Crc32Mpeg2;

/// Sentinel in the PID map marking a PID as dropped.
pub const FILTERED: u16 = TS_MAX_PIDS as u16;

/// Period of the SI timer re-emitting cached tables in `no_reload` mode.
const SI_INTERVAL: Duration = Duration::from_millis(500);

/// Longest accepted map selector.
const MAP_SELECTOR_MAX: usize = 5;

/// Configuration surface of a [`Channel`].
///
/// `name` is required and used only for logging. When `pnr` is present the
/// channel runs in program-demux mode; otherwise it passes the PIDs listed
/// in `pids` unchanged.
#[derive(Debug, Clone, Default)]
pub struct ChannelConfig {
    /// Channel name for log messages (required)
    pub name: String,
    /// Program number to demultiplex; `Some(0)` adopts the first program
    /// advertised by the PAT
    pub pnr: Option<u16>,
    /// Replacement program number written into PAT/PMT/SDT/EIT
    pub set_pnr: Option<u16>,
    /// Track the CAT and join ECM/EMM PIDs found in CA descriptors
    pub cas: bool,
    /// Do not track or emit the SDT
    pub no_sdt: bool,
    /// Do not track or emit EIT/TDT
    pub no_eit: bool,
    /// Capture tables once and re-emit the cached rewrites periodically
    /// instead of reacting to upstream changes
    pub no_reload: bool,
    /// Forward SDT packets untouched instead of rewriting them
    pub pass_sdt: bool,
    /// Forward EIT packets untouched instead of rewriting them
    pub pass_eit: bool,
    /// PIDs to pass in plain filter mode (no `pnr`); range 32..=8190
    pub pids: Vec<u16>,
    /// Ordered remap rules `(selector, output pid)`. A selector is at most
    /// 5 characters: a literal origin PID when it starts with a digit,
    /// else `"video"`, `"audio"`, `"sub"`, `"pmt"`, a three-letter
    /// language code, or `""` as catch-all
    pub map: Vec<(String, u16)>,
    /// PIDs to drop
    pub filter: Vec<u16>,
    /// Inverse filter: when non-empty, only these PIDs pass
    pub filter_inverse: Vec<u16>,
}

impl ChannelConfig {
    /// Creates a configuration with the given name and all options off.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }
}

/// One remap rule. Rules are consumed in configuration order on first
/// match and re-armed by a stream reload, so a changed PMT is mapped from
/// scratch; selector-only rules may then bind to different PIDs if the new
/// PMT orders its entries differently.
struct MapRule {
    selector: String,
    origin_pid: Option<u16>,
    custom_pid: u16,
    is_set: bool,
}

impl MapRule {
    fn parse(selector: &str, custom_pid: u16) -> Self {
        let origin_pid = if selector.as_bytes().first().is_some_and(|b| (b'1'..=b'9').contains(b)) {
            let digits: String = selector.chars().take_while(char::is_ascii_digit).collect();
            digits.parse().ok().filter(|&pid| pid > 0)
        } else {
            None
        };
        Self { selector: selector.to_string(), origin_pid, custom_pid, is_set: false }
    }
}

/// PSI-aware packet filter emitting a single program out of an MPTS.
///
/// Create with [`Channel::new`]; the channel inserts itself into the
/// [`StreamGraph`] and installs no-op demux hooks so PID requests from its
/// children are answered by its own table tracking rather than forwarded
/// upstream.
pub struct Channel {
    config: ChannelConfig,
    node: NodeId,
    /// effective program number; 0 until adopted from the PAT
    pnr: u16,

    map: Vec<MapRule>,
    pid_map: Box<[u16]>,
    stream: Box<[TsType]>,
    tsid: u16,

    pat: PsiPacket,
    cat: PsiPacket,
    pmt: PsiPacket,
    sdt: PsiPacket,
    eit: PsiPacket,
    custom_pat: PsiPacket,
    custom_cat: PsiPacket,
    custom_pmt: PsiPacket,
    custom_sdt: PsiPacket,

    sdt_original_section_id: u8,
    sdt_max_section_id: u8,
    sdt_checksum_list: Option<Vec<u32>>,

    eit_cc: u8,
    pat_version: u8,
    si_timer: Option<Interval>,

    crc: Crc32Mpeg2,
}

impl Channel {
    /// Validates the configuration, inserts the channel into the graph
    /// under `upstream` and subscribes its initial PIDs.
    pub fn new(
        graph: &mut StreamGraph,
        upstream: Option<NodeId>,
        config: ChannelConfig,
    ) -> Result<Rc<RefCell<Channel>>> {
        Self::validate(&config)?;

        let node = graph.add_node(None);
        let channel = Rc::new(RefCell::new(Self::from_config(node, config)));
        graph.set_sink(node, Some(channel.clone()));
        graph.set_demux_hooks(node, None, None);

        if let Some(upstream) = upstream {
            graph.attach(Some(upstream), node);
        }
        channel.borrow_mut().init_subscriptions(graph);

        Ok(channel)
    }

    fn validate(config: &ChannelConfig) -> Result<()> {
        if config.name.is_empty() {
            return Err(TsPipeError::Config("option 'name' is required".into()));
        }
        for &pid in &config.pids {
            if !(32..=8190).contains(&pid) {
                return Err(TsPipeError::Config(format!(
                    "option 'pid': pid {} is out of range",
                    pid
                )));
            }
        }
        for (selector, pid) in &config.map {
            if selector.len() > MAP_SELECTOR_MAX {
                return Err(TsPipeError::Config(format!(
                    "option 'map': selector '{}' is too large",
                    selector
                )));
            }
            if !(1..=8190).contains(pid) {
                return Err(TsPipeError::Config(format!(
                    "option 'map': pid {} is out of range",
                    pid
                )));
            }
        }
        for &pid in config.filter.iter().chain(&config.filter_inverse) {
            if pid as usize >= TS_MAX_PIDS {
                return Err(TsPipeError::Config(format!(
                    "option 'filter': pid {} is out of range",
                    pid
                )));
            }
        }
        Ok(())
    }

    fn from_config(node: NodeId, config: ChannelConfig) -> Self {
        let map = config.map.iter().map(|(s, pid)| MapRule::parse(s, *pid)).collect();
        let mut pid_map = vec![0u16; TS_MAX_PIDS].into_boxed_slice();

        for &pid in &config.filter {
            pid_map[pid as usize] = FILTERED;
        }
        if !config.filter_inverse.is_empty() {
            pid_map.fill(FILTERED);
            for &pid in &config.filter_inverse {
                pid_map[pid as usize] = 0;
            }
        }

        let si_timer = (config.pnr.is_some() && config.no_reload)
            .then(|| Interval::new(SI_INTERVAL));

        Self {
            pnr: config.pnr.unwrap_or(0),
            node,
            map,
            pid_map,
            stream: vec![TsType::Unknown; TS_MAX_PIDS].into_boxed_slice(),
            tsid: 0,
            pat: PsiPacket::new(PID_PAT),
            cat: PsiPacket::new(PID_CAT),
            pmt: PsiPacket::new(TS_MAX_PIDS as u16),
            sdt: PsiPacket::new(PID_SDT),
            eit: PsiPacket::new(PID_EIT),
            custom_pat: PsiPacket::new(PID_PAT),
            custom_cat: PsiPacket::new(PID_CAT),
            custom_pmt: PsiPacket::new(TS_MAX_PIDS as u16),
            custom_sdt: PsiPacket::new(PID_SDT),
            sdt_original_section_id: 0,
            sdt_max_section_id: 0,
            sdt_checksum_list: None,
            eit_cc: 0,
            pat_version: 0,
            si_timer,
            crc: Crc32Mpeg2::new(),
            config,
        }
    }

    fn init_subscriptions(&mut self, graph: &mut StreamGraph) {
        if self.config.pnr.is_some() {
            self.stream[PID_PAT as usize] = TsType::Pat;
            graph.join(self.node, PID_PAT);

            if self.config.cas {
                self.stream[PID_CAT as usize] = TsType::Cat;
                graph.join(self.node, PID_CAT);
            }
            if !self.config.no_sdt {
                self.stream[PID_SDT as usize] = TsType::Sdt;
                graph.join(self.node, PID_SDT);
            }
            if !self.config.no_eit {
                self.stream[PID_EIT as usize] = TsType::Eit;
                graph.join(self.node, PID_EIT);
                self.stream[PID_TDT as usize] = TsType::Tdt;
                graph.join(self.node, PID_TDT);
            }
        } else {
            for &pid in &self.config.pids {
                self.stream[pid as usize] = TsType::Pes;
                graph.join(self.node, pid);
            }
        }
    }

    /// The channel's node in the stream graph.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Tears the channel out of the graph, releasing its subscriptions and
    /// orphaning its children.
    pub fn destroy(&mut self, graph: &mut StreamGraph) {
        graph.destroy(self.node);
    }

    /// Fires the SI timer if due, re-emitting the cached custom tables.
    /// Driven by the embedding loop; a no-op unless `no_reload` is set.
    pub fn poll_si_timer(&mut self, graph: &mut StreamGraph, now: Instant) {
        let due = match self.si_timer.as_mut() {
            Some(timer) => timer.tick(now),
            None => false,
        };
        if due {
            self.emit_cached_tables(graph);
        }
    }

    /// Re-emits every cached custom table (PAT, CAT, PMT, SDT).
    ///
    /// In `no_reload` mode the real-time table forwarding is squelched
    /// after the first capture; this replaces it.
    pub fn emit_cached_tables(&mut self, graph: &mut StreamGraph) {
        let node = self.node;
        Self::emit(&mut self.custom_pat, graph, node);
        Self::emit(&mut self.custom_cat, graph, node);
        Self::emit(&mut self.custom_pmt, graph, node);
        Self::emit(&mut self.custom_sdt, graph, node);
    }

    fn emit(table: &mut PsiPacket, graph: &mut StreamGraph, node: NodeId) {
        table.demux(|ts| graph.send(node, ts));
    }

    /// Drops every subscription and learned table, then re-arms the
    /// mandatory PIDs so the stream info is learned afresh. Triggered when
    /// a monitored table's checksum changes.
    fn stream_reload(&mut self, graph: &mut StreamGraph) {
        self.stream.fill(TsType::Unknown);

        for pid in 0..TS_MAX_PIDS as u16 {
            if graph.check(self.node, pid) {
                graph.leave(self.node, pid);
            }
        }

        self.pat.crc32 = 0;
        self.pmt.crc32 = 0;

        self.stream[PID_PAT as usize] = TsType::Pat;
        graph.join(self.node, PID_PAT);

        if self.config.cas {
            self.cat.crc32 = 0;
            self.stream[PID_CAT as usize] = TsType::Cat;
            graph.join(self.node, PID_CAT);
        }

        if !self.config.no_sdt {
            self.stream[PID_SDT as usize] = TsType::Sdt;
            graph.join(self.node, PID_SDT);
            self.sdt_checksum_list = None;
        }

        if !self.config.no_eit {
            self.stream[PID_EIT as usize] = TsType::Eit;
            graph.join(self.node, PID_EIT);
            self.stream[PID_TDT as usize] = TsType::Tdt;
            graph.join(self.node, PID_TDT);
        }

        for rule in &mut self.map {
            rule.is_set = false;
        }
    }

    /// First unconsumed rule matching the PID literally or the selector by
    /// name wins; it is consumed and recorded in the PID map. Returns 0
    /// when nothing matches.
    fn map_custom_pid(&mut self, pid: u16, selector: &str) -> u16 {
        for rule in &mut self.map {
            if rule.is_set {
                continue;
            }
            if rule.origin_pid == Some(pid) || rule.selector == selector {
                rule.is_set = true;
                self.pid_map[pid as usize] = rule.custom_pid;
                return rule.custom_pid;
            }
        }
        0
    }

    /// Marks a CA stream found in a CA descriptor and joins its PID,
    /// clearing any filter on it.
    fn join_ca_pid(&mut self, graph: &mut StreamGraph, ca_pid: u16) {
        if self.stream[ca_pid as usize] == TsType::Unknown && ca_pid != NULL_PID {
            self.stream[ca_pid as usize] = TsType::Ca;
            if self.pid_map[ca_pid as usize] == FILTERED {
                self.pid_map[ca_pid as usize] = 0;
            }
            graph.join(self.node, ca_pid);
        }
    }

    /*
     * PAT
     */

    fn handle_pat(&mut self, graph: &mut StreamGraph, section: &[u8]) {
        if section[0] != TABLE_ID_PAT {
            return;
        }

        // check changes
        let crc32 = psi::section_crc32(section);
        if crc32 == self.pat.crc32 {
            Self::emit(&mut self.custom_pat, graph, self.node);
            return;
        }

        // check crc
        if crc32 != psi::calc_crc32(section, &self.crc) {
            error!("[channel {}] PAT checksum error", self.config.name);
            return;
        }

        // reload stream
        if self.pat.crc32 != 0 {
            warn!("[channel {}] PAT changed. Reload stream info", self.config.name);
            self.stream_reload(graph);
        }

        self.pat.crc32 = crc32;
        self.tsid = tables::pat_tsid(section);

        let mut matched = None;
        for entry in tables::pat_entries(section) {
            if entry.pnr == 0 {
                continue;
            }
            if self.pnr == 0 {
                self.pnr = entry.pnr;
            }
            if entry.pnr == self.pnr {
                matched = Some(entry);
                break;
            }
        }

        let entry = match matched {
            Some(entry) => entry,
            None => {
                self.custom_pat.buffer_size = 0;
                error!(
                    "[channel {}] PAT: stream with id {} is not found",
                    self.config.name, self.pnr
                );
                return;
            }
        };

        self.stream[entry.pid as usize] = TsType::Pmt;
        graph.join(self.node, entry.pid);
        self.pmt.pid = entry.pid;
        self.pmt.crc32 = 0;

        // rebuild the single-entry custom PAT
        self.pat_version = (self.pat_version + 1) & 0x0F;
        tables::pat_init(&mut self.custom_pat.buffer, self.tsid, self.pat_version);
        self.custom_pat.buffer[8..12].copy_from_slice(entry.raw);

        self.custom_pmt.pid = self.pmt.pid;

        if let Some(set_pnr) = self.config.set_pnr {
            tables::pat_entry_set_pnr(&mut self.custom_pat.buffer, 8, set_pnr);
        }

        if !self.map.is_empty() {
            let custom_pid = self.map_custom_pid(self.pmt.pid, "pmt");
            if custom_pid != 0 {
                tables::pat_entry_set_pid(&mut self.custom_pat.buffer, 8, custom_pid);
                self.custom_pmt.pid = custom_pid;
            }
        }

        self.custom_pat.buffer_size = 8 + 4 + CRC32_SIZE;
        self.custom_pat.finalize(&self.crc);
        Self::emit(&mut self.custom_pat, graph, self.node);

        if self.config.no_reload {
            self.stream[self.pat.pid as usize] = TsType::Unknown;
        }
    }

    /*
     * CAT
     */

    fn handle_cat(&mut self, graph: &mut StreamGraph, section: &[u8]) {
        if section[0] != TABLE_ID_CAT {
            return;
        }

        let crc32 = psi::section_crc32(section);
        if crc32 == self.cat.crc32 {
            Self::emit(&mut self.custom_cat, graph, self.node);
            return;
        }

        if crc32 != psi::calc_crc32(section, &self.crc) {
            error!("[channel {}] CAT checksum error", self.config.name);
            return;
        }

        // a changed CAT reloads without reprocessing the stale payload;
        // the reload re-joins the CAT and learns it afresh
        if self.cat.crc32 != 0 {
            warn!("[channel {}] CAT changed. Reload stream info", self.config.name);
            self.stream_reload(graph);
            return;
        }

        self.cat.crc32 = crc32;

        for desc in tables::descriptors(&section[8..section.len() - CRC32_SIZE]) {
            if desc[0] == DESC_TAG_CA {
                self.join_ca_pid(graph, tables::desc_ca_pid(desc));
            }
        }

        self.custom_cat.set_section(section);
        self.custom_cat.cc = 0;
        Self::emit(&mut self.custom_cat, graph, self.node);

        if self.config.no_reload {
            self.stream[self.cat.pid as usize] = TsType::Unknown;
        }
    }

    /*
     * PMT
     */

    fn handle_pmt(&mut self, graph: &mut StreamGraph, section: &[u8]) {
        if section[0] != TABLE_ID_PMT {
            return;
        }

        if tables::pmt_pnr(section) != self.pnr {
            return;
        }

        let crc32 = psi::section_crc32(section);
        if crc32 == self.pmt.crc32 {
            Self::emit(&mut self.custom_pmt, graph, self.node);
            return;
        }

        if crc32 != psi::calc_crc32(section, &self.crc) {
            error!("[channel {}] PMT checksum error", self.config.name);
            return;
        }

        if self.pmt.crc32 != 0 {
            warn!("[channel {}] PMT changed. Reload stream info", self.config.name);
            self.stream_reload(graph);
            return;
        }

        self.pmt.crc32 = crc32;

        let mut skip: usize = 12;
        self.custom_pmt.buffer[..10].copy_from_slice(&section[..10]);

        let pcr_pid = tables::pmt_pcr_pid(section);
        let mut join_pcr = true;

        for desc in tables::pmt_program_descriptors(section) {
            if desc[0] == DESC_TAG_CA && self.config.cas {
                self.join_ca_pid(graph, tables::desc_ca_pid(desc));
            }
            self.custom_pmt.buffer[skip..skip + desc.len()].copy_from_slice(desc);
            skip += desc.len();
        }

        // program_info_length, reserved nibble carried from the source
        let info_length = skip - 12;
        self.custom_pmt.buffer[10] = (section[10] & 0xF0) | ((info_length >> 8) as u8 & 0x0F);
        self.custom_pmt.buffer[11] = (info_length & 0xFF) as u8;

        if let Some(set_pnr) = self.config.set_pnr {
            tables::pmt_set_pnr(&mut self.custom_pmt.buffer, set_pnr);
        }

        for entry in tables::pmt_es_entries(section) {
            let pid = entry.pid;
            if self.pid_map[pid as usize] == FILTERED {
                continue;
            }

            let mut es_type = stream_es_type(entry.stream_type);
            let mut language: Option<[u8; 3]> = None;

            let skip_last = skip;
            self.custom_pmt.buffer[skip..skip + 5].copy_from_slice(entry.raw_header);
            skip += 5;

            self.stream[pid as usize] = TsType::Pes;
            graph.join(self.node, pid);

            if pid == pcr_pid {
                join_pcr = false;
            }

            for desc in tables::descriptors(entry.descriptors) {
                match desc[0] {
                    DESC_TAG_CA => {
                        if self.config.cas {
                            self.join_ca_pid(graph, tables::desc_ca_pid(desc));
                        }
                    }
                    DESC_TAG_LANGUAGE => {
                        language = Some(tables::desc_language(desc));
                    }
                    tag => {
                        if entry.stream_type == 0x06 && es_type == TsType::Data {
                            es_type = private_es_type(tag);
                        }
                    }
                }
                self.custom_pmt.buffer[skip..skip + desc.len()].copy_from_slice(desc);
                skip += desc.len();
            }

            // ES_info_length, reserved nibble carried from the source
            let es_info_length = skip - skip_last - 5;
            self.custom_pmt.buffer[skip_last + 3] = (self.custom_pmt.buffer[skip_last + 3]
                & 0xF0)
                | ((es_info_length >> 8) as u8 & 0x0F);
            self.custom_pmt.buffer[skip_last + 4] = (es_info_length & 0xFF) as u8;

            if !self.map.is_empty() {
                let custom_pid = match es_type {
                    TsType::Video => self.map_custom_pid(pid, "video"),
                    TsType::Audio => {
                        let mut custom_pid = 0;
                        if let Some(language) = language {
                            if let Ok(code) = std::str::from_utf8(&language) {
                                custom_pid = self.map_custom_pid(pid, code);
                            }
                        }
                        if custom_pid == 0 {
                            custom_pid = self.map_custom_pid(pid, "audio");
                        }
                        custom_pid
                    }
                    TsType::Sub => self.map_custom_pid(pid, "sub"),
                    _ => self.map_custom_pid(pid, ""),
                };
                if custom_pid != 0 {
                    tables::pmt_es_set_pid(&mut self.custom_pmt.buffer, skip_last, custom_pid);
                }
            }
        }

        self.custom_pmt.buffer_size = skip + CRC32_SIZE;

        if join_pcr {
            self.stream[pcr_pid as usize] = TsType::Pes;
            if self.pid_map[pcr_pid as usize] == FILTERED {
                self.pid_map[pcr_pid as usize] = 0;
            }
            graph.join(self.node, pcr_pid);
        }

        if !self.map.is_empty() && self.pid_map[pcr_pid as usize] != 0 {
            tables::pmt_set_pcr_pid(&mut self.custom_pmt.buffer, self.pid_map[pcr_pid as usize]);
        }

        self.custom_pmt.finalize(&self.crc);
        Self::emit(&mut self.custom_pmt, graph, self.node);

        if self.config.no_reload {
            self.stream[self.pmt.pid as usize] = TsType::Unknown;
        }
    }

    /*
     * SDT
     */

    fn handle_sdt(&mut self, graph: &mut StreamGraph, section: &[u8]) {
        if section[0] != TABLE_ID_SDT_ACTUAL {
            return;
        }

        if self.tsid != tables::sdt_tsid(section) {
            return;
        }

        let crc32 = psi::section_crc32(section);
        if crc32 != psi::calc_crc32(section, &self.crc) {
            error!("[channel {}] SDT checksum error", self.config.name);
            return;
        }

        // per-section change detection: the SDT may span many sections
        if self.sdt_checksum_list.is_none() {
            let max_section_id = tables::sdt_last_section_number(section);
            self.sdt_max_section_id = max_section_id;
            self.sdt_checksum_list = Some(vec![0; max_section_id as usize + 1]);
        }

        let section_id = tables::sdt_section_number(section);
        if section_id > self.sdt_max_section_id {
            warn!(
                "[channel {}] SDT: section_number is greater than last_section_number",
                self.config.name
            );
            return;
        }

        let stored = self
            .sdt_checksum_list
            .as_ref()
            .map_or(0, |checksums| checksums[section_id as usize]);
        if stored == crc32 {
            if self.sdt_original_section_id == section_id {
                Self::emit(&mut self.custom_sdt, graph, self.node);
            }
            return;
        }

        if stored != 0 {
            warn!("[channel {}] SDT changed. Reload stream info", self.config.name);
            self.stream_reload(graph);
            return;
        }

        if let Some(checksums) = self.sdt_checksum_list.as_mut() {
            checksums[section_id as usize] = crc32;
        }

        let service = match tables::sdt_services(section).find(|s| s.service_id == self.pnr) {
            Some(service) => service,
            None => return,
        };

        self.sdt_original_section_id = section_id;

        // single-section custom SDT carrying only our service
        self.custom_sdt.buffer[..11].copy_from_slice(&section[..11]);
        tables::sdt_set_section_numbers(&mut self.custom_sdt.buffer, 0, 0);
        self.custom_sdt.buffer[11..11 + service.raw.len()].copy_from_slice(service.raw);
        self.custom_sdt.buffer_size = 11 + service.raw.len() + CRC32_SIZE;

        if let Some(set_pnr) = self.config.set_pnr {
            tables::sdt_service_set_sid(&mut self.custom_sdt.buffer, 11, set_pnr);
        }

        self.custom_sdt.finalize(&self.crc);
        Self::emit(&mut self.custom_sdt, graph, self.node);

        if self.config.no_reload {
            self.stream[self.sdt.pid as usize] = TsType::Unknown;
        }
    }

    /*
     * EIT
     */

    fn handle_eit(&mut self, graph: &mut StreamGraph, section: &[u8]) {
        let table_id = section[0];
        let is_actual = table_id == TABLE_ID_EIT_PF_ACTUAL
            || (TABLE_ID_EIT_SCHED_FIRST..=TABLE_ID_EIT_SCHED_LAST).contains(&table_id);
        if !is_actual {
            return;
        }

        if self.tsid != tables::eit_tsid(section) {
            return;
        }
        if self.pnr != tables::eit_service_id(section) {
            return;
        }

        // the remuxed SI stream carries our own continuity counter
        self.eit.set_section(section);
        self.eit.cc = self.eit_cc;

        if let Some(set_pnr) = self.config.set_pnr {
            tables::eit_set_service_id(&mut self.eit.buffer, set_pnr);
            self.eit.finalize(&self.crc);
        }

        Self::emit(&mut self.eit, graph, self.node);
        self.eit_cc = self.eit.cc;
    }
}

impl TsSink for Channel {
    fn on_ts(&mut self, graph: &mut StreamGraph, node: NodeId, ts: &[u8]) {
        let pid = packet::get_pid(ts);
        if !graph.check(node, pid) {
            return;
        }
        if pid == NULL_PID {
            return;
        }

        match self.stream[pid as usize] {
            TsType::Pes => {}
            TsType::Pat => {
                if self.pat.mux(ts) {
                    while let Some(section) = self.pat.pop_section() {
                        self.handle_pat(graph, &section);
                    }
                }
                return;
            }
            TsType::Cat => {
                if self.cat.mux(ts) {
                    while let Some(section) = self.cat.pop_section() {
                        self.handle_cat(graph, &section);
                    }
                }
                return;
            }
            TsType::Pmt => {
                if self.pmt.mux(ts) {
                    while let Some(section) = self.pmt.pop_section() {
                        self.handle_pmt(graph, &section);
                    }
                }
                return;
            }
            TsType::Sdt => {
                if !self.config.pass_sdt {
                    if self.sdt.mux(ts) {
                        while let Some(section) = self.sdt.pop_section() {
                            self.handle_sdt(graph, &section);
                        }
                    }
                    return;
                }
            }
            TsType::Eit => {
                if !self.config.pass_eit {
                    if self.eit.mux(ts) {
                        while let Some(section) = self.eit.pop_section() {
                            self.handle_eit(graph, &section);
                        }
                    }
                    return;
                }
            }
            TsType::Unknown => return,
            _ => {}
        }

        if self.pid_map[pid as usize] == FILTERED {
            return;
        }

        if !self.map.is_empty() {
            let custom_pid = self.pid_map[pid as usize];
            if custom_pid != 0 {
                let mut custom_ts = [0u8; TS_PACKET_SIZE];
                custom_ts.copy_from_slice(&ts[..TS_PACKET_SIZE]);
                packet::set_pid(&mut custom_ts, custom_pid);
                graph.send(node, &custom_ts);
                return;
            }
        }

        graph.send(node, ts);
    }
}
