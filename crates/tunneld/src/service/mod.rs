mod tunnel_service;

pub(crate) use tunnel_service::{
    ConnectResult, DisconnectResult, PingArgs, ServiceCommand, StatusResult, TunnelService,
    TunnelStateChange,
};
