//! Universe configuration: the NZX tickers and the market indices.
//!
//! Tickers are stored bare (`AIR`) and gain the exchange suffix (`.NZ`) when
//! turned into Yahoo symbols. Indices are already Yahoo symbols (`^NZ50`).
//! One index is the benchmark the labels are measured against.

use serde::{Deserialize, Serialize};
use std::path::Path;

const NZX_TICKERS: [&str; 119] = [
    "ABA", "AFC", "AFT", "AIA", "AIR", "ALF", "AOR", "APL", "ARB", "ARG", "ARV", "ATM", "AUG",
    "AWF", "BFG", "BGI", "BGP", "BLT", "CAV", "CBD", "CDI", "CEN", "CGF", "CMO", "CNU", "CVT",
    "DGL", "EBO", "ENS", "ERD", "EVO", "FBU", "FPH", "FRE", "FSF", "FWL", "GEN", "GEO", "GFL",
    "GMT", "GNE", "GSH", "GTK", "GXH", "HGH", "HLG", "IFT", "IKE", "IPL", "JLG", "KMD", "KPG",
    "MCK", "MCY", "MEE", "MEL", "MET", "MFT", "MGL", "MMH", "MOA", "MPG", "MWE", "NPH", "NTL",
    "NWF", "NZK", "NZM", "NZO", "NZR", "NZX", "OCA", "PCT", "PEB", "PFI", "PGW", "PIL", "PLX",
    "POT", "PPH", "PYS", "QEX", "RAK", "RBD", "RYM", "SAN", "SCL", "SCT", "SCY", "SDL", "SEK",
    "SKC", "SKL", "SKO", "SKT", "SML", "SNC", "SPG", "SPK", "SPN", "SPY", "STU", "SUM", "TGG",
    "THL", "TLL", "TLT", "TPW", "TRA", "TRS", "TRU", "TWR", "VCT", "VGL", "VHP", "VTL", "WDT",
    "WHS", "ZEL",
];

const NZX_INDICES: [&str; 4] = ["^NZ50", "^GSPC", "^DJI", "^VIX"];

/// The complete universe configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Universe {
    /// Bare exchange tickers.
    pub tickers: Vec<String>,
    /// Exchange suffix appended to every ticker for Yahoo.
    #[serde(default = "default_suffix")]
    pub suffix: String,
    /// Index symbols, downloaded alongside the equities.
    pub indices: Vec<String>,
    /// The index whose forward return defines the label.
    pub benchmark: String,
}

fn default_suffix() -> String {
    ".NZ".to_string()
}

impl Default for Universe {
    fn default() -> Self {
        Self::default_nzx()
    }
}

impl Universe {
    /// The NZX main board universe with the NZX 50 as benchmark.
    pub fn default_nzx() -> Self {
        Self {
            tickers: NZX_TICKERS.iter().map(|t| t.to_string()).collect(),
            suffix: default_suffix(),
            indices: NZX_INDICES.iter().map(|t| t.to_string()).collect(),
            benchmark: "^NZ50".to_string(),
        }
    }

    /// Load a universe from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content =
            std::fs::read_to_string(path).map_err(|e| format!("read universe file: {e}"))?;
        Self::from_toml(&content)
    }

    /// Parse a universe from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, String> {
        let universe: Self =
            toml::from_str(content).map_err(|e| format!("parse universe TOML: {e}"))?;
        universe.validate()?;
        Ok(universe)
    }

    /// Serialize the universe to TOML.
    pub fn to_toml(&self) -> Result<String, String> {
        toml::to_string_pretty(self).map_err(|e| format!("serialize universe: {e}"))
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.indices.iter().any(|i| i == &self.benchmark) {
            return Err(format!(
                "benchmark '{}' is not one of the indices {:?}",
                self.benchmark, self.indices
            ));
        }
        Ok(())
    }

    /// Keep only the first `n` tickers. Indices are untouched.
    pub fn limit(mut self, n: usize) -> Self {
        self.tickers.truncate(n);
        self
    }

    /// Yahoo symbols of the equities (`AIR` → `AIR.NZ`).
    pub fn equity_symbols(&self) -> Vec<String> {
        self.tickers
            .iter()
            .map(|t| format!("{t}{}", self.suffix))
            .collect()
    }

    /// Everything the price download needs: equities first, then indices.
    pub fn price_symbols(&self) -> Vec<String> {
        let mut symbols = self.equity_symbols();
        symbols.extend(self.indices.iter().cloned());
        symbols
    }

    /// Indices other than the benchmark; their past returns become features.
    pub fn context_indices(&self) -> impl Iterator<Item = &str> {
        self.indices
            .iter()
            .map(|s| s.as_str())
            .filter(move |s| *s != self.benchmark)
    }

    pub fn ticker_count(&self) -> usize {
        self.tickers.len()
    }
}
