use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Clone)]
pub struct BusMetrics {
    pub transactions: IntCounter,
    pub errors: IntCounter,
    pub servos_online: IntGauge,
    pub reassignments: IntCounter,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub bus: BusMetrics,
}

impl MetricsHub {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();
        let transactions =
            IntCounter::new("arm_bus_transactions", "Total servo bus transactions issued")
                .map_err(|e| format!("metrics init error: {e}"))?;
        let errors = IntCounter::new("arm_bus_errors", "Servo bus transactions that failed")
            .map_err(|e| format!("metrics init error: {e}"))?;
        let servos_online =
            IntGauge::new("arm_servos_online", "Servos that answered the last discovery")
                .map_err(|e| format!("metrics init error: {e}"))?;
        let reassignments =
            IntCounter::new("arm_reassignments", "Servo addresses rewritten at runtime")
                .map_err(|e| format!("metrics init error: {e}"))?;
        let bus = BusMetrics {
            transactions,
            errors,
            servos_online,
            reassignments,
        };
        let _ = registry.register(Box::new(bus.transactions.clone()));
        let _ = registry.register(Box::new(bus.errors.clone()));
        let _ = registry.register(Box::new(bus.servos_online.clone()));
        let _ = registry.register(Box::new(bus.reassignments.clone()));
        Ok(Self { registry, bus })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
