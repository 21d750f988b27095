//! Descripteur de device : `<root>` / `<device>`.

use std::io::BufReader;

use xmltree::{Element, XMLNode};

use crate::descriptor::{
    child_text, children_named, emit, push_opt_text, push_text, spec_version, DescriptorError,
    DEVICE_NS,
};
use crate::model::{Device, DeviceBuilder, Icon, Service, ServicePaths, Udn};

/// Écrit le descripteur complet d'un device (sous-devices compris).
pub fn write_device_descriptor(device: &Device) -> Result<String, DescriptorError> {
    let mut root = Element::new("root");
    root.attributes
        .insert("xmlns".to_string(), DEVICE_NS.to_string());
    root.children.push(spec_version());
    root.children.push(XMLNode::Element(device_element(device)));
    emit(&root)
}

fn device_element(device: &Device) -> Element {
    let mut elem = Element::new("device");

    push_text(&mut elem, "deviceType", &device.device_type().to_string());
    push_text(&mut elem, "friendlyName", device.friendly_name());
    push_text(&mut elem, "manufacturer", device.manufacturer());
    push_opt_text(&mut elem, "manufacturerURL", device.manufacturer_url());
    push_opt_text(&mut elem, "modelDescription", device.model_description());
    push_text(&mut elem, "modelName", device.model_name());
    push_opt_text(&mut elem, "modelNumber", device.model_number());
    push_opt_text(&mut elem, "modelURL", device.model_url());
    push_opt_text(&mut elem, "serialNumber", device.serial_number());
    push_text(&mut elem, "UDN", device.udn().as_str());
    push_opt_text(&mut elem, "UPC", device.upc());

    if !device.icons().is_empty() {
        let mut icon_list = Element::new("iconList");
        for icon in device.icons() {
            let mut icon_elem = Element::new("icon");
            push_text(&mut icon_elem, "mimetype", &icon.mime_type);
            push_text(&mut icon_elem, "width", &icon.width.to_string());
            push_text(&mut icon_elem, "height", &icon.height.to_string());
            push_text(&mut icon_elem, "depth", &icon.depth.to_string());
            push_text(&mut icon_elem, "url", &icon.url);
            icon_list.children.push(XMLNode::Element(icon_elem));
        }
        elem.children.push(XMLNode::Element(icon_list));
    }

    if !device.services().is_empty() {
        let mut service_list = Element::new("serviceList");
        for service in device.services() {
            let mut svc = Element::new("service");
            push_text(&mut svc, "serviceType", &service.service_type().to_string());
            push_text(&mut svc, "serviceId", &service.service_id().to_string());
            push_text(&mut svc, "SCPDURL", &service.paths().scpd);
            push_text(&mut svc, "controlURL", &service.paths().control);
            push_text(&mut svc, "eventSubURL", &service.paths().event);
            service_list.children.push(XMLNode::Element(svc));
        }
        elem.children.push(XMLNode::Element(service_list));
    }

    if !device.embedded_devices().is_empty() {
        let mut device_list = Element::new("deviceList");
        for child in device.embedded_devices() {
            device_list
                .children
                .push(XMLNode::Element(device_element(child)));
        }
        elem.children.push(XMLNode::Element(device_list));
    }

    push_opt_text(&mut elem, "presentationURL", device.presentation_url());

    elem
}

/// Lit un descripteur de device.
///
/// Les services sont retournés en coquilles (type, id, chemins) ; leurs
/// tables d'actions et de variables viennent du SCPD, récupéré ensuite.
pub fn read_device_descriptor(xml: &[u8]) -> Result<Device, DescriptorError> {
    let root = Element::parse(BufReader::new(xml))?;
    let device_elem = root
        .get_child("device")
        .ok_or(DescriptorError::MissingField {
            element: "root",
            field: "device",
        })?;
    read_device_element(device_elem)
}

fn read_device_element(elem: &Element) -> Result<Device, DescriptorError> {
    let device_type = child_text(elem, "deviceType")
        .ok_or(DescriptorError::MissingField {
            element: "device",
            field: "deviceType",
        })?
        .parse()
        .map_err(|e| DescriptorError::InvalidField {
            element: "device",
            field: "deviceType",
            detail: format!("{e}"),
        })?;

    let udn: Udn = child_text(elem, "UDN")
        .ok_or(DescriptorError::MissingField {
            element: "device",
            field: "UDN",
        })?
        .parse()
        .map_err(|e| DescriptorError::InvalidField {
            element: "device",
            field: "UDN",
            detail: format!("{e}"),
        })?;

    // Champs descriptifs : tolérants, vides si absents.
    let friendly_name = child_text(elem, "friendlyName").unwrap_or_default();
    let mut builder = DeviceBuilder::new(udn, device_type, &friendly_name)
        .manufacturer(&child_text(elem, "manufacturer").unwrap_or_default())
        .model_name(&child_text(elem, "modelName").unwrap_or_default());

    if let Some(v) = child_text(elem, "manufacturerURL") {
        builder = builder.manufacturer_url(&v);
    }
    if let Some(v) = child_text(elem, "modelDescription") {
        builder = builder.model_description(&v);
    }
    if let Some(v) = child_text(elem, "modelNumber") {
        builder = builder.model_number(&v);
    }
    if let Some(v) = child_text(elem, "modelURL") {
        builder = builder.model_url(&v);
    }
    if let Some(v) = child_text(elem, "serialNumber") {
        builder = builder.serial_number(&v);
    }
    if let Some(v) = child_text(elem, "UPC") {
        builder = builder.upc(&v);
    }
    if let Some(v) = child_text(elem, "presentationURL") {
        builder = builder.presentation_url(&v);
    }

    if let Some(icon_list) = elem.get_child("iconList") {
        for icon_elem in children_named(icon_list, "icon") {
            if let Some(icon) = read_icon(icon_elem) {
                builder = builder.icon(icon);
            }
        }
    }

    if let Some(service_list) = elem.get_child("serviceList") {
        for svc_elem in children_named(service_list, "service") {
            let service = read_service_shell(svc_elem)?;
            builder = builder.service(service).map_err(|e| {
                DescriptorError::InvalidField {
                    element: "serviceList",
                    field: "serviceId",
                    detail: e.to_string(),
                }
            })?;
        }
    }

    if let Some(device_list) = elem.get_child("deviceList") {
        for child_elem in children_named(device_list, "device") {
            let child = read_device_element(child_elem)?;
            builder =
                builder
                    .embedded_device(child)
                    .map_err(|e| DescriptorError::InvalidField {
                        element: "deviceList",
                        field: "UDN",
                        detail: e.to_string(),
                    })?;
        }
    }

    Ok(builder.build())
}

fn read_icon(elem: &Element) -> Option<Icon> {
    Some(Icon {
        mime_type: child_text(elem, "mimetype")?,
        width: child_text(elem, "width")?.parse().ok()?,
        height: child_text(elem, "height")?.parse().ok()?,
        depth: child_text(elem, "depth")?.parse().ok()?,
        url: child_text(elem, "url")?,
    })
}

fn read_service_shell(elem: &Element) -> Result<Service, DescriptorError> {
    let service_type = child_text(elem, "serviceType")
        .ok_or(DescriptorError::MissingField {
            element: "service",
            field: "serviceType",
        })?
        .parse()
        .map_err(|e| DescriptorError::InvalidField {
            element: "service",
            field: "serviceType",
            detail: format!("{e}"),
        })?;
    let service_id = child_text(elem, "serviceId")
        .ok_or(DescriptorError::MissingField {
            element: "service",
            field: "serviceId",
        })?
        .parse()
        .map_err(|e| DescriptorError::InvalidField {
            element: "service",
            field: "serviceId",
            detail: format!("{e}"),
        })?;

    let paths = ServicePaths {
        scpd: child_text(elem, "SCPDURL").unwrap_or_default(),
        control: child_text(elem, "controlURL").unwrap_or_default(),
        event: child_text(elem, "eventSubURL").unwrap_or_default(),
    };
    Ok(Service::shell(service_type, service_id, paths))
}
