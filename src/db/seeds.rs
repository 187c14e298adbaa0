use crate::models::*;

/// Lab routers seeded into an empty inventory on first start
pub(super) fn default_devices() -> Vec<CreateDeviceRequest> {
    [
        ("R15", 32783),
        ("R16", 32773),
        ("R17", 32785),
        ("R18", 32786),
        ("R19", 32771),
        ("R20", 32788),
    ]
    .into_iter()
    .map(|(hostname, port)| CreateDeviceRequest {
        hostname: hostname.to_string(),
        management_address: "172.16.39.102".to_string(),
        port,
        platform: "ios".to_string(),
        credential_profile: None,
    })
    .collect()
}

/// Built-in template catalog as (name, description, body)
pub(super) fn default_templates() -> Vec<(&'static str, &'static str, &'static str)> {
    vec![
        (
            "interface_basic",
            "Layer 3 interface with address",
            "interface {{ interface | default(value=\"GigabitEthernet0/1\") }}\n ip address {{ ip_address }} {{ subnet_mask }}\n no shutdown",
        ),
        (
            "interface_description",
            "Set an interface description",
            "interface {{ interface }}\n description {{ description }}",
        ),
        (
            "vlan_create",
            "Create a VLAN and optionally assign access ports",
            "vlan {{ vlan_id }}\n name {{ vlan_name }}\n{% if ports is defined %}{% for port in ports %}interface {{ port }}\n switchport mode access\n switchport access vlan {{ vlan_id }}\n{% endfor %}{% endif %}",
        ),
        (
            "ospf_basic",
            "Single-area OSPF network statement",
            "router ospf {{ process_id | default(value=1) }}\n router-id {{ router_id }}\n network {{ network }} {{ wildcard }} area {{ area | default(value=0) }}",
        ),
        (
            "static_route",
            "IPv4 static route",
            "ip route {{ prefix }} {{ mask }} {{ next_hop }}",
        ),
        (
            "banner_motd",
            "Login banner naming the device",
            "banner motd ^{{ message }} ({{ hostname }})^",
        ),
        (
            "show_running",
            "Retrieve the running configuration",
            "show running-config",
        ),
    ]
}
